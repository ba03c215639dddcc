//! error types for keyquorum

use thiserror::Error;

use crate::registry::Role;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // === entropy errors ===
    #[error("entropy unavailable: {responded} of {required} sources responded")]
    EntropyUnavailable { responded: usize, required: usize },

    #[error("entropy source failed: {0}")]
    SourceFailed(String),

    // === implementation selection errors ===
    #[error("no implementation available for role {role}")]
    NoImplementationAvailable { role: Role },

    #[error("implementation {id} is not available on this node")]
    ImplementationUnavailable { id: String },

    #[error("unknown implementation id: {id}")]
    UnknownImplementation { id: String },

    // === envelope errors ===
    #[error("decapsulation failure")]
    DecapsulationFailure,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    // === threshold recovery errors ===
    #[error("invalid threshold: k={k}, n={n}")]
    InvalidThreshold { n: u8, k: u8 },

    #[error("threshold not met: {valid} valid shares, need {required}")]
    ThresholdNotMet { valid: usize, required: usize },

    #[error("share integrity failure at indices {bad_indices:?}: {valid} valid shares, need {required}")]
    ShareIntegrityFailure {
        bad_indices: Vec<u8>,
        valid: usize,
        required: usize,
    },

    #[error("invalid share format")]
    InvalidShareFormat,

    #[error("no share set for account {account_id}")]
    UnknownAccount { account_id: String },

    #[error("stale share-set generation: expected {expected}, found {found}")]
    StaleGeneration { expected: u64, found: u64 },

    // === device errors ===
    #[error("device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("no wrapped master key issued for device {device_id}")]
    NoWrappedKey { device_id: String },

    // === pairing errors ===
    #[error("pairing token expired")]
    TokenExpired,

    #[error("pairing token already used or never issued")]
    TokenAlreadyUsed,

    #[error("invalid pairing payload")]
    InvalidPairingPayload,

    // === configuration errors ===
    #[error("config error: {0}")]
    Config(String),

    // === network errors ===
    #[cfg(feature = "network")]
    #[error("network error: {0}")]
    Network(String),
}
