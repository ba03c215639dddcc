//! qr pairing tokens
//!
//! the payload a new device scans to fetch its freshly issued wrapped
//! master key: a single-use bearer token, an endpoint, and a short expiry.
//! the bridge service that serves the fetch is external; this module
//! guarantees single use and expiry on the issuing side.

use std::collections::HashMap;
use std::sync::Mutex;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::PairingConfig;
use crate::crypto;
use crate::{Error, Result};

/// allowed token lifetime bounds in seconds
const MIN_TTL_SECS: u64 = 60;
const MAX_TTL_SECS: u64 = 120;

/// the qr payload
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingToken {
    pub token: String,
    pub endpoint: String,
    pub expires_at: u64,
}

impl PairingToken {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|_| Error::InvalidPairingPayload)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|_| Error::InvalidPairingPayload)
    }
}

/// issues and redeems single-use pairing tokens
pub struct PairingBroker {
    ttl_secs: u64,
    outstanding: Mutex<HashMap<String, u64>>,
}

impl PairingBroker {
    pub fn new(config: &PairingConfig) -> Self {
        Self {
            ttl_secs: config.ttl_secs.clamp(MIN_TTL_SECS, MAX_TTL_SECS),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// mint a fresh token for `endpoint`
    pub fn issue(&self, endpoint: &str) -> PairingToken {
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(crypto::random_bytes::<32>());
        let expires_at = crypto::unix_now() + self.ttl_secs;

        let mut outstanding = self.outstanding.lock().expect("pairing lock");
        outstanding.retain(|_, &mut expiry| expiry > crypto::unix_now());
        outstanding.insert(token.clone(), expires_at);

        PairingToken {
            token,
            endpoint: endpoint.to_string(),
            expires_at,
        }
    }

    /// consume a token exactly once
    pub fn redeem(&self, token: &str) -> Result<()> {
        let mut outstanding = self.outstanding.lock().expect("pairing lock");
        let expires_at = outstanding
            .remove(token)
            .ok_or(Error::TokenAlreadyUsed)?;
        if crypto::unix_now() >= expires_at {
            return Err(Error::TokenExpired);
        }
        Ok(())
    }

    /// tokens currently outstanding (expired ones may linger until the next
    /// issue)
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.lock().expect("pairing lock").len()
    }
}
