//! startup detection of usable crypto implementations
//!
//! the registry is built once at process start: every candidate in the
//! configured priority order is round-trip self-tested and marked available
//! only on success. the result is immutable and shared by reference; no
//! component probes implementations per call or mutates the outcome at
//! runtime. the descriptor order is the configured priority order, never
//! detection order, so independent processes with the same configuration
//! agree on preference.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{self, KemBackend, SignatureBackend};
use crate::config::RegistryConfig;
use crate::crypto::unix_now;
use crate::{Error, Result};

/// what a cryptographic implementation is for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Kem,
    Signature,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Kem => write!(f, "kem"),
            Role::Signature => write!(f, "signature"),
        }
    }
}

/// one implementation's identity, availability, and artifact sizes
#[derive(Clone, Debug, Serialize)]
pub struct ImplementationDescriptor {
    pub id: String,
    pub role: Role,
    pub available: bool,
    pub self_test_passed_at: Option<u64>,
    pub public_key_len: usize,
    pub secret_key_len: usize,
    /// ciphertext length for kem, signature length for signature
    pub artifact_len: usize,
    /// zero for signature implementations
    pub shared_secret_len: usize,
}

/// crate version plus the full detection outcome
#[derive(Clone, Debug, Serialize)]
pub struct VersionInfo {
    pub crate_version: &'static str,
    pub kem: Vec<ImplementationDescriptor>,
    pub signature: Vec<ImplementationDescriptor>,
}

const SELF_TEST_MESSAGE: &[u8] = b"keyquorum:self-test:v1";

pub struct AlgorithmRegistry {
    kem: Vec<(ImplementationDescriptor, Arc<dyn KemBackend>)>,
    signature: Vec<(ImplementationDescriptor, Arc<dyn SignatureBackend>)>,
}

impl AlgorithmRegistry {
    /// self-test every configured candidate and freeze the outcome
    pub fn detect(config: &RegistryConfig) -> Result<Self> {
        let kem_candidates = backend::kem_candidates();
        let mut kem = Vec::with_capacity(config.kem_priority.len());
        for id in &config.kem_priority {
            let candidate = kem_candidates
                .iter()
                .find(|c| c.id() == id)
                .ok_or_else(|| {
                    Error::Config(format!("unknown kem implementation in priority list: {id}"))
                })?;
            let passed = kem_self_test(candidate.as_ref());
            if passed {
                info!(id = %id, "kem implementation available");
            } else {
                warn!(id = %id, "kem self-test failed, implementation disabled");
            }
            kem.push((
                ImplementationDescriptor {
                    id: id.clone(),
                    role: Role::Kem,
                    available: passed,
                    self_test_passed_at: passed.then(unix_now),
                    public_key_len: candidate.public_key_len(),
                    secret_key_len: candidate.secret_key_len(),
                    artifact_len: candidate.ciphertext_len(),
                    shared_secret_len: candidate.shared_secret_len(),
                },
                Arc::clone(candidate),
            ));
        }

        let signature_candidates = backend::signature_candidates();
        let mut signature = Vec::with_capacity(config.signature_priority.len());
        for id in &config.signature_priority {
            let candidate = signature_candidates
                .iter()
                .find(|c| c.id() == id)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "unknown signature implementation in priority list: {id}"
                    ))
                })?;
            let passed = signature_self_test(candidate.as_ref());
            if passed {
                info!(id = %id, "signature implementation available");
            } else {
                warn!(id = %id, "signature self-test failed, implementation disabled");
            }
            signature.push((
                ImplementationDescriptor {
                    id: id.clone(),
                    role: Role::Signature,
                    available: passed,
                    self_test_passed_at: passed.then(unix_now),
                    public_key_len: candidate.public_key_len(),
                    secret_key_len: candidate.secret_key_len(),
                    artifact_len: candidate.signature_len(),
                    shared_secret_len: 0,
                },
                Arc::clone(candidate),
            ));
        }

        Ok(Self { kem, signature })
    }

    /// all descriptors for a role, in priority order
    pub fn descriptors(&self, role: Role) -> Vec<&ImplementationDescriptor> {
        match role {
            Role::Kem => self.kem.iter().map(|(d, _)| d).collect(),
            Role::Signature => self.signature.iter().map(|(d, _)| d).collect(),
        }
    }

    /// available descriptors for a role, in priority order
    pub fn available(&self, role: Role) -> Vec<&ImplementationDescriptor> {
        self.descriptors(role)
            .into_iter()
            .filter(|d| d.available)
            .collect()
    }

    /// re-select the exact implementation tagged on an artifact
    pub fn resolve(&self, id: &str) -> Result<&ImplementationDescriptor> {
        self.kem
            .iter()
            .map(|(d, _)| d)
            .chain(self.signature.iter().map(|(d, _)| d))
            .find(|d| d.id == id)
            .ok_or_else(|| Error::UnknownImplementation { id: id.to_string() })
    }

    pub(crate) fn kem_backend(&self, id: &str) -> Result<&Arc<dyn KemBackend>> {
        let (descriptor, backend) = self
            .kem
            .iter()
            .find(|(d, _)| d.id == id)
            .ok_or_else(|| Error::UnknownImplementation { id: id.to_string() })?;
        if !descriptor.available {
            return Err(Error::ImplementationUnavailable { id: id.to_string() });
        }
        Ok(backend)
    }

    pub(crate) fn signature_backend(&self, id: &str) -> Result<&Arc<dyn SignatureBackend>> {
        let (descriptor, backend) = self
            .signature
            .iter()
            .find(|(d, _)| d.id == id)
            .ok_or_else(|| Error::UnknownImplementation { id: id.to_string() })?;
        if !descriptor.available {
            return Err(Error::ImplementationUnavailable { id: id.to_string() });
        }
        Ok(backend)
    }

    pub(crate) fn preferred_kem(&self) -> Result<(&ImplementationDescriptor, &Arc<dyn KemBackend>)> {
        self.kem
            .iter()
            .find(|(d, _)| d.available)
            .map(|(d, b)| (d, b))
            .ok_or(Error::NoImplementationAvailable { role: Role::Kem })
    }

    pub(crate) fn preferred_signature(
        &self,
    ) -> Result<(&ImplementationDescriptor, &Arc<dyn SignatureBackend>)> {
        self.signature
            .iter()
            .find(|(d, _)| d.available)
            .map(|(d, b)| (d, b))
            .ok_or(Error::NoImplementationAvailable {
                role: Role::Signature,
            })
    }

    /// crate version and per-implementation detection outcome
    pub fn version_info(&self) -> VersionInfo {
        VersionInfo {
            crate_version: env!("CARGO_PKG_VERSION"),
            kem: self.kem.iter().map(|(d, _)| d.clone()).collect(),
            signature: self.signature.iter().map(|(d, _)| d.clone()).collect(),
        }
    }
}

fn kem_self_test(backend: &dyn KemBackend) -> bool {
    let Ok((pk, sk)) = backend.generate(None) else {
        return false;
    };
    if pk.len() != backend.public_key_len() || sk.len() != backend.secret_key_len() {
        return false;
    }
    let Ok((ct, ss_enc)) = backend.encapsulate(&pk) else {
        return false;
    };
    if ct.len() != backend.ciphertext_len() {
        return false;
    }
    match backend.decapsulate(&ct, sk.as_bytes()) {
        Ok(ss_dec) => ss_enc.as_bytes() == ss_dec.as_bytes(),
        Err(_) => false,
    }
}

fn signature_self_test(backend: &dyn SignatureBackend) -> bool {
    let Ok((pk, sk)) = backend.generate(None) else {
        return false;
    };
    if pk.len() != backend.public_key_len() || sk.len() != backend.secret_key_len() {
        return false;
    }
    let Ok(sig) = backend.sign(SELF_TEST_MESSAGE, sk.as_bytes()) else {
        return false;
    };
    if sig.len() != backend.signature_len() {
        return false;
    }
    let valid = backend.verify(&sig, SELF_TEST_MESSAGE, &pk).unwrap_or(false);
    let tamper_rejected = !backend
        .verify(&sig, b"keyquorum:self-test:tampered", &pk)
        .unwrap_or(true);
    valid && tamper_rejected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KEM_MLKEM768, KEM_X25519, SIG_ED25519, SIG_MLDSA65};

    #[test]
    fn test_detect_default_priority_order() {
        let registry = AlgorithmRegistry::detect(&RegistryConfig::default()).unwrap();

        let kem_ids: Vec<&str> = registry
            .available(Role::Kem)
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(kem_ids, vec![KEM_MLKEM768, KEM_X25519]);

        let sig_ids: Vec<&str> = registry
            .available(Role::Signature)
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(sig_ids, vec![SIG_MLDSA65, SIG_ED25519]);
    }

    #[test]
    fn test_detect_is_deterministic() {
        let config = RegistryConfig::default();
        let first = AlgorithmRegistry::detect(&config).unwrap();
        let second = AlgorithmRegistry::detect(&config).unwrap();

        for role in [Role::Kem, Role::Signature] {
            let a: Vec<(String, bool)> = first
                .descriptors(role)
                .iter()
                .map(|d| (d.id.clone(), d.available))
                .collect();
            let b: Vec<(String, bool)> = second
                .descriptors(role)
                .iter()
                .map(|d| (d.id.clone(), d.available))
                .collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_configured_order_wins_over_detection_order() {
        let config = RegistryConfig {
            kem_priority: vec![KEM_X25519.to_string(), KEM_MLKEM768.to_string()],
            signature_priority: vec![SIG_ED25519.to_string(), SIG_MLDSA65.to_string()],
        };
        let registry = AlgorithmRegistry::detect(&config).unwrap();

        let (preferred, _) = registry.preferred_kem().unwrap();
        assert_eq!(preferred.id, KEM_X25519);
        let (preferred, _) = registry.preferred_signature().unwrap();
        assert_eq!(preferred.id, SIG_ED25519);
    }

    #[test]
    fn test_unknown_priority_id_is_config_error() {
        let config = RegistryConfig {
            kem_priority: vec!["kem-unheard-of".to_string()],
            signature_priority: vec![SIG_MLDSA65.to_string()],
        };
        assert!(matches!(
            AlgorithmRegistry::detect(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let registry = AlgorithmRegistry::detect(&RegistryConfig::default()).unwrap();

        let descriptor = registry.resolve(KEM_MLKEM768).unwrap();
        assert_eq!(descriptor.role, Role::Kem);
        assert!(descriptor.available);
        assert!(descriptor.self_test_passed_at.is_some());

        assert!(matches!(
            registry.resolve("sig-nonexistent"),
            Err(Error::UnknownImplementation { .. })
        ));
    }

    #[test]
    fn test_descriptor_lengths_match_backends() {
        let registry = AlgorithmRegistry::detect(&RegistryConfig::default()).unwrap();
        let descriptor = registry.resolve(KEM_MLKEM768).unwrap();
        assert_eq!(descriptor.public_key_len, 1184);
        assert_eq!(descriptor.artifact_len, 1088);
        assert_eq!(descriptor.shared_secret_len, 32);
    }
}
