//! device enrollment and master-key envelopes
//!
//! each enrolled device holds its own kem key pair; the account master key
//! is wrapped per device under a freshly encapsulated shared secret. the
//! device secret key never arrives here, and the wrapped ciphertext on the
//! record is the only server-side form of the master key.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::crypto;
use crate::provider::{CryptoProvider, KemCiphertext};
use crate::sensitive::MasterKey;
use crate::{Error, Result};

const DEVICE_WRAP_INFO: &[u8] = b"keyquorum:device-wrap:v1";

/// wrapped master key for one device
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceEnvelope {
    pub kem_ciphertext: KemCiphertext,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub encrypted_master_key: Vec<u8>,
    #[serde(with = "crate::encoding::hex_array")]
    pub nonce: [u8; crypto::NONCE_LEN],
}

/// one enrolled device
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub kem_public_key: Vec<u8>,
    pub implementation_id: String,
    pub wrapped_master_key: Option<DeviceEnvelope>,
    pub registered_at: u64,
}

pub struct DeviceEnvelopeManager {
    provider: Arc<CryptoProvider>,
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

/// stable device id derived from the public key
fn derive_device_id(kem_public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"keyquorum:device-id:v1:");
    hasher.update(kem_public_key);
    hex::encode(&hasher.finalize()[..16])
}

impl DeviceEnvelopeManager {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self {
            provider,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// enroll a device by its kem public key; no wrapped key is issued yet
    ///
    /// re-registering the same public key returns the existing record
    pub fn register_device(
        &self,
        kem_public_key: &[u8],
        implementation_id: &str,
    ) -> Result<DeviceRecord> {
        let descriptor = self.provider.registry().resolve(implementation_id)?;
        if kem_public_key.len() != descriptor.public_key_len {
            return Err(Error::InvalidKey(format!(
                "public key length {} does not match {} ({})",
                kem_public_key.len(),
                implementation_id,
                descriptor.public_key_len
            )));
        }

        let device_id = derive_device_id(kem_public_key);
        let mut devices = self.devices.write().expect("device lock");
        let record = devices
            .entry(device_id.clone())
            .or_insert_with(|| {
                info!(device_id = %device_id, implementation = implementation_id, "device registered");
                DeviceRecord {
                    device_id: device_id.clone(),
                    kem_public_key: kem_public_key.to_vec(),
                    implementation_id: implementation_id.to_string(),
                    wrapped_master_key: None,
                    registered_at: crypto::unix_now(),
                }
            })
            .clone();
        Ok(record)
    }

    /// wrap the master key for one device and store the envelope
    ///
    /// caller contract: only an already-authorized party (a device holding
    /// the unwrapped master key, or the initial enrollment flow) may invoke
    /// this; the surrounding api layer enforces that
    pub fn issue_wrapped_master_key(
        &self,
        device_id: &str,
        master_key: &MasterKey,
    ) -> Result<DeviceEnvelope> {
        let (public_key, implementation_id) = {
            let devices = self.devices.read().expect("device lock");
            let record = devices.get(device_id).ok_or_else(|| Error::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;
            (record.kem_public_key.clone(), record.implementation_id.clone())
        };

        let (kem_ciphertext, shared) = self
            .provider
            .encapsulate(&public_key, Some(&implementation_id))?;
        let wrap_key = crypto::derive_wrap_key(
            shared.as_bytes(),
            &[DEVICE_WRAP_INFO, device_id.as_bytes()],
        )?;
        let nonce: [u8; crypto::NONCE_LEN] = crypto::random_bytes();
        let encrypted_master_key = crypto::encrypt(
            &wrap_key,
            &nonce,
            master_key.as_bytes(),
            device_id.as_bytes(),
        )?;

        let envelope = DeviceEnvelope {
            kem_ciphertext,
            encrypted_master_key,
            nonce,
        };

        let mut devices = self.devices.write().expect("device lock");
        let record = devices.get_mut(device_id).ok_or_else(|| Error::DeviceNotFound {
            device_id: device_id.to_string(),
        })?;
        record.wrapped_master_key = Some(envelope.clone());
        info!(device_id = %device_id, "wrapped master key issued");
        Ok(envelope)
    }

    /// fetch the stored envelope for a device
    pub fn wrapped_key(&self, device_id: &str) -> Result<DeviceEnvelope> {
        let devices = self.devices.read().expect("device lock");
        let record = devices.get(device_id).ok_or_else(|| Error::DeviceNotFound {
            device_id: device_id.to_string(),
        })?;
        record
            .wrapped_master_key
            .clone()
            .ok_or_else(|| Error::NoWrappedKey {
                device_id: device_id.to_string(),
            })
    }

    /// recover the master key with the device's secret key
    ///
    /// any ciphertext/key mismatch is a single `DecapsulationFailure`; there
    /// is no partial success
    pub fn unwrap(&self, device_id: &str, device_secret_key: &[u8]) -> Result<MasterKey> {
        let envelope = self.wrapped_key(device_id)?;

        let shared = self
            .provider
            .decapsulate(&envelope.kem_ciphertext, device_secret_key)?;
        let wrap_key = crypto::derive_wrap_key(
            shared.as_bytes(),
            &[DEVICE_WRAP_INFO, device_id.as_bytes()],
        )?;
        let plaintext = crypto::decrypt(
            &wrap_key,
            &envelope.nonce,
            &envelope.encrypted_master_key,
            device_id.as_bytes(),
        )
        .map_err(|_| Error::DecapsulationFailure)?;

        MasterKey::from_slice(&plaintext).ok_or(Error::DecapsulationFailure)
    }

    /// delete the record; the device can no longer unwrap
    ///
    /// this does not rotate the master key for still-valid devices;
    /// rotation is a separate, explicit operation
    pub fn revoke_device(&self, device_id: &str) -> Result<()> {
        let mut devices = self.devices.write().expect("device lock");
        devices
            .remove(device_id)
            .map(|_| info!(device_id = %device_id, "device revoked"))
            .ok_or_else(|| Error::DeviceNotFound {
                device_id: device_id.to_string(),
            })
    }

    /// look up one record
    pub fn device(&self, device_id: &str) -> Result<DeviceRecord> {
        let devices = self.devices.read().expect("device lock");
        devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                device_id: device_id.to_string(),
            })
    }

    /// all enrolled device ids
    pub fn device_ids(&self) -> Vec<String> {
        let devices = self.devices.read().expect("device lock");
        devices.keys().cloned().collect()
    }
}
