//! configuration for the core
//!
//! everything has a working default; deployments override via any serde
//! format the embedding layer chooses.

use serde::Deserialize;

use crate::backend;
use crate::{Error, Result};

/// default minimum number of independent entropy sources
const DEFAULT_MIN_SOURCES: usize = 2;

/// default bytes requested from each source
const DEFAULT_SAMPLE_LEN: usize = 32;

/// default overall collection deadline in milliseconds
const DEFAULT_TIMEOUT_MS: u64 = 2_000;

/// default quality floor below which a sample is excluded
const DEFAULT_QUALITY_FLOOR: f64 = 0.5;

/// default pairing token lifetime in seconds
const DEFAULT_PAIRING_TTL_SECS: u64 = 90;

/// entropy collection settings
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// minimum sources that must respond before key generation may proceed
    pub min_sources: usize,
    /// bytes requested from each source per collection
    pub sample_len: usize,
    /// overall deadline for one collection round, in milliseconds
    pub timeout_ms: u64,
    /// samples scoring below this are marked degraded and excluded
    pub quality_floor: f64,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            min_sources: DEFAULT_MIN_SOURCES,
            sample_len: DEFAULT_SAMPLE_LEN,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            quality_floor: DEFAULT_QUALITY_FLOOR,
        }
    }
}

impl EntropyConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// implementation priority lists
///
/// the ordered ids here define the closed set of candidate implementations
/// and their preference order. every node and client in one deployment must
/// carry byte-identical lists or cross-party verification becomes undefined.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub kem_priority: Vec<String>,
    pub signature_priority: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kem_priority: vec![
                backend::KEM_MLKEM768.to_string(),
                backend::KEM_X25519.to_string(),
            ],
            signature_priority: vec![
                backend::SIG_MLDSA65.to_string(),
                backend::SIG_ED25519.to_string(),
            ],
        }
    }
}

/// pairing token settings
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// token lifetime in seconds, clamped to 60..=120 at use
    pub ttl_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_PAIRING_TTL_SECS,
        }
    }
}

/// top-level configuration
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub entropy: EntropyConfig,
    pub registry: RegistryConfig,
    pub pairing: PairingConfig,
}

impl CoreConfig {
    /// reject configurations that cannot work before any component starts
    pub fn validate(&self) -> Result<()> {
        if self.entropy.min_sources == 0 {
            return Err(Error::Config("entropy.min_sources must be at least 1".into()));
        }
        if self.entropy.sample_len == 0 {
            return Err(Error::Config("entropy.sample_len must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.entropy.quality_floor) {
            return Err(Error::Config("entropy.quality_floor must be within 0..=1".into()));
        }
        if self.registry.kem_priority.is_empty() || self.registry.signature_priority.is_empty() {
            return Err(Error::Config("registry priority lists must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        CoreConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_overrides_keep_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{ "entropy": { "min_sources": 3 } }"#).unwrap();
        assert_eq!(config.entropy.min_sources, 3);
        assert_eq!(config.entropy.sample_len, DEFAULT_SAMPLE_LEN);
        assert_eq!(config.registry.kem_priority[0], backend::KEM_MLKEM768);
    }

    #[test]
    fn test_bad_config_rejected() {
        let mut config = CoreConfig::default();
        config.entropy.min_sources = 0;
        assert!(config.validate().is_err());

        let mut config = CoreConfig::default();
        config.registry.kem_priority.clear();
        assert!(config.validate().is_err());
    }
}
