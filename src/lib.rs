//! # keyquorum
//!
//! key management and threshold recovery core for an account vault:
//! per-device master-key envelopes plus guardian recovery via shamir
//! secret sharing, over self-tested, priority-ordered crypto backends.
//!
//! ## architecture
//!
//! ```text
//!  ┌──────────────────┐   ┌───────────────────┐
//!  │ EntropyAggregator│   │ AlgorithmRegistry │   (leaves, built first)
//!  └────────┬─────────┘   └─────────┬─────────┘
//!           │                       │
//!           └──────────┬────────────┘
//!                      ▼
//!            ┌──────────────────┐
//!            │  CryptoProvider  │   (keygen / sign / encapsulate,
//!            └────────┬─────────┘    every artifact tagged with its
//!                     │              implementation id)
//!          ┌──────────┴──────────────┐
//!          ▼                         ▼
//!  ┌───────────────────┐   ┌─────────────────────────┐
//!  │DeviceEnvelopeMgr  │   │ ThresholdRecoveryManager│
//!  │ (wrap MK per      │   │ (split MK into (n, k)   │
//!  │  device)          │   │  guardian shares)       │
//!  └────────┬──────────┘   └─────────────────────────┘
//!           │ master key
//!           ▼
//!    ┌─────────────┐
//!    │ vault codec │   (per-item DEK envelopes)
//!    └─────────────┘
//! ```
//!
//! ## invariants
//!
//! - descriptor lists are priority-ordered by configuration, identical on
//!   every node, and immutable after startup detection
//! - every artifact carries the implementation id that produced it, and
//!   consumers re-select exactly that implementation or fail closed
//! - the master key never exists in cleartext at rest; k of n guardian
//!   shares reconstruct it, k-1 reveal nothing
//! - key material is zeroized on every exit path
//!
//! ## usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keyquorum::{
//!     AlgorithmRegistry, CoreConfig, CryptoProvider, DeviceEnvelopeManager,
//!     EntropyAggregator, OsEntropySource, ThresholdRecoveryManager,
//! };
//!
//! let config = CoreConfig::default();
//! config.validate()?;
//!
//! // leaves first, injected downward; no globals
//! let registry = Arc::new(AlgorithmRegistry::detect(&config.registry)?);
//! let mut aggregator = EntropyAggregator::new(config.entropy.clone());
//! aggregator.add_source(Arc::new(OsEntropySource));
//! let entropy = Arc::new(aggregator);
//!
//! let provider = Arc::new(CryptoProvider::new(registry, Arc::clone(&entropy)));
//! let devices = DeviceEnvelopeManager::new(Arc::clone(&provider));
//! let recovery = ThresholdRecoveryManager::new(provider, entropy);
//! ```

pub mod backend;
pub mod config;
pub mod crypto;
pub mod device;
pub mod entropy;
pub mod error;
pub mod pairing;
pub mod provider;
pub mod recovery;
pub mod registry;
pub mod sensitive;
pub mod shamir;
pub mod vault;

mod encoding;

pub use config::{CoreConfig, EntropyConfig, PairingConfig, RegistryConfig};
pub use device::{DeviceEnvelope, DeviceEnvelopeManager, DeviceRecord};
pub use entropy::{EntropyAggregator, EntropySample, EntropySource, OsEntropySource, Seed};
pub use error::{Error, Result};
pub use pairing::{PairingBroker, PairingToken};
pub use provider::{CryptoProvider, KemCiphertext, KeyPair, Signature};
pub use recovery::{
    Guardian, GuardianShare, OpenedShare, ThresholdPolicy, ThresholdRecoveryManager,
};
pub use registry::{AlgorithmRegistry, ImplementationDescriptor, Role, VersionInfo};
pub use sensitive::{MasterKey, SecretBytes32, SecretVec};
pub use vault::{decrypt_item, encrypt_item, re_encrypt_item, VaultItemEnvelope};

#[cfg(feature = "network")]
pub use entropy::HttpEntropySource;
