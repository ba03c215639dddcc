//! tagged crypto operations over the detected implementations
//!
//! every artifact carries the implementation id that produced it, and every
//! consuming operation re-selects exactly that implementation. a missing
//! implementation is a typed failure, never a fallback to something else.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entropy::{EntropyAggregator, Seed};
use crate::registry::{AlgorithmRegistry, Role};
use crate::sensitive::{SecretBytes32, SecretVec};
use crate::{crypto, Error, Result};

/// key pair tagged with the implementation that produced it
pub struct KeyPair {
    pub public_key: Vec<u8>,
    pub secret_key: SecretVec,
    pub implementation_id: String,
    pub role: Role,
}

/// detached signature tagged with the implementation that produced it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Signature {
    #[serde(with = "crate::encoding::hex_bytes")]
    pub bytes: Vec<u8>,
    pub implementation_id: String,
}

/// kem ciphertext plus key-confirmation tag
///
/// the tag makes a mismatched decapsulation detectable instead of yielding
/// a pseudorandom secret
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KemCiphertext {
    #[serde(with = "crate::encoding::hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::encoding::hex_array")]
    pub confirmation_tag: [u8; crypto::TAG_LEN],
    pub implementation_id: String,
}

pub struct CryptoProvider {
    registry: Arc<AlgorithmRegistry>,
    entropy: Arc<EntropyAggregator>,
}

impl CryptoProvider {
    pub fn new(registry: Arc<AlgorithmRegistry>, entropy: Arc<EntropyAggregator>) -> Self {
        Self { registry, entropy }
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    /// collect fresh entropy and generate a key pair
    pub async fn generate_key_pair(
        &self,
        role: Role,
        implementation_id: Option<&str>,
    ) -> Result<KeyPair> {
        let seed = self.entropy.gather_seed().await?;
        self.generate_key_pair_seeded(role, &seed, implementation_id)
    }

    /// generate a key pair from an already-aggregated seed
    ///
    /// uses the highest-priority available implementation for `role` unless
    /// a specific `implementation_id` is requested to match a peer
    pub fn generate_key_pair_seeded(
        &self,
        role: Role,
        seed: &Seed,
        implementation_id: Option<&str>,
    ) -> Result<KeyPair> {
        match role {
            Role::Kem => {
                let (id, backend) = match implementation_id {
                    Some(id) => (id.to_string(), Arc::clone(self.registry.kem_backend(id)?)),
                    None => {
                        let (descriptor, backend) = self.registry.preferred_kem()?;
                        (descriptor.id.clone(), Arc::clone(backend))
                    }
                };
                let keygen_seed = seed.derive(&format!("keyquorum:keygen:{id}:v1"));
                let (public_key, secret_key) = backend.generate(Some(&keygen_seed))?;
                Ok(KeyPair {
                    public_key,
                    secret_key,
                    implementation_id: id,
                    role,
                })
            }
            Role::Signature => {
                let (id, backend) = match implementation_id {
                    Some(id) => (
                        id.to_string(),
                        Arc::clone(self.registry.signature_backend(id)?),
                    ),
                    None => {
                        let (descriptor, backend) = self.registry.preferred_signature()?;
                        (descriptor.id.clone(), Arc::clone(backend))
                    }
                };
                let keygen_seed = seed.derive(&format!("keyquorum:keygen:{id}:v1"));
                let (public_key, secret_key) = backend.generate(Some(&keygen_seed))?;
                Ok(KeyPair {
                    public_key,
                    secret_key,
                    implementation_id: id,
                    role,
                })
            }
        }
    }

    /// sign with the implementation tagged on the key pair
    pub fn sign(&self, message: &[u8], key_pair: &KeyPair) -> Result<Signature> {
        if key_pair.role != Role::Signature {
            return Err(Error::SigningFailed("key pair role is not signature".into()));
        }
        let backend = self.registry.signature_backend(&key_pair.implementation_id)?;
        Ok(Signature {
            bytes: backend.sign(message, key_pair.secret_key.as_bytes())?,
            implementation_id: key_pair.implementation_id.clone(),
        })
    }

    /// verify with exactly the implementation tagged on the signature
    ///
    /// fails closed when that implementation is unknown or unavailable
    /// locally; it never falls back to a different algorithm
    pub fn verify(&self, signature: &Signature, message: &[u8], public_key: &[u8]) -> Result<bool> {
        let backend = self.registry.signature_backend(&signature.implementation_id)?;
        match backend.verify(&signature.bytes, message, public_key) {
            Ok(valid) => Ok(valid),
            // unparseable key or artifact under the tagged implementation is
            // a verification failure, not a usable result
            Err(Error::InvalidKey(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// encapsulate a fresh shared secret to `public_key`
    pub fn encapsulate(
        &self,
        public_key: &[u8],
        implementation_id: Option<&str>,
    ) -> Result<(KemCiphertext, SecretBytes32)> {
        let (id, backend) = match implementation_id {
            Some(id) => (id.to_string(), Arc::clone(self.registry.kem_backend(id)?)),
            None => {
                let (descriptor, backend) = self.registry.preferred_kem()?;
                (descriptor.id.clone(), Arc::clone(backend))
            }
        };
        let (ciphertext, shared) = backend.encapsulate(public_key)?;
        let confirmation_tag = crypto::confirmation_tag(shared.as_bytes(), &ciphertext);
        Ok((
            KemCiphertext {
                ciphertext,
                confirmation_tag,
                implementation_id: id,
            },
            shared,
        ))
    }

    /// decapsulate with exactly the implementation tagged on the ciphertext
    pub fn decapsulate(
        &self,
        ciphertext: &KemCiphertext,
        secret_key: &[u8],
    ) -> Result<SecretBytes32> {
        let backend = self.registry.kem_backend(&ciphertext.implementation_id)?;
        let shared = backend.decapsulate(&ciphertext.ciphertext, secret_key)?;
        if !crypto::verify_confirmation_tag(
            shared.as_bytes(),
            &ciphertext.ciphertext,
            &ciphertext.confirmation_tag,
        ) {
            return Err(Error::DecapsulationFailure);
        }
        Ok(shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KEM_MLKEM768, KEM_X25519, SIG_ED25519, SIG_MLDSA65};
    use crate::config::{EntropyConfig, RegistryConfig};
    use crate::entropy::StaticEntropySource;

    fn fixture_with(registry_config: &RegistryConfig) -> CryptoProvider {
        let registry = Arc::new(AlgorithmRegistry::detect(registry_config).unwrap());
        let mut aggregator = EntropyAggregator::new(EntropyConfig::default());
        aggregator.add_source(Arc::new(StaticEntropySource::new(
            "fixture-a",
            (0u8..32).collect(),
            0.9,
        )));
        aggregator.add_source(Arc::new(StaticEntropySource::new(
            "fixture-b",
            (100u8..132).collect(),
            0.9,
        )));
        CryptoProvider::new(registry, Arc::new(aggregator))
    }

    fn fixture() -> CryptoProvider {
        fixture_with(&RegistryConfig::default())
    }

    #[tokio::test]
    async fn test_kem_roundtrip_all_implementations() {
        let provider = fixture();
        for id in [KEM_MLKEM768, KEM_X25519] {
            let key_pair = provider
                .generate_key_pair(Role::Kem, Some(id))
                .await
                .unwrap();
            assert_eq!(key_pair.implementation_id, id);

            let (ciphertext, shared_enc) = provider
                .encapsulate(&key_pair.public_key, Some(id))
                .unwrap();
            let shared_dec = provider
                .decapsulate(&ciphertext, key_pair.secret_key.as_bytes())
                .unwrap();
            assert_eq!(shared_enc.as_bytes(), shared_dec.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_decapsulate_with_wrong_key_fails_closed() {
        let provider = fixture();

        // ml-kem: a second generated key pair is independent
        let key_pair = provider
            .generate_key_pair(Role::Kem, Some(KEM_MLKEM768))
            .await
            .unwrap();
        let other = provider
            .generate_key_pair(Role::Kem, Some(KEM_MLKEM768))
            .await
            .unwrap();
        let (ciphertext, _) = provider
            .encapsulate(&key_pair.public_key, Some(KEM_MLKEM768))
            .unwrap();
        let err = provider
            .decapsulate(&ciphertext, other.secret_key.as_bytes())
            .unwrap_err();
        assert!(matches!(err, Error::DecapsulationFailure));

        // x25519: any 32 bytes are a usable secret key, so a random one
        // exercises the confirmation-tag rejection path
        let key_pair = provider
            .generate_key_pair(Role::Kem, Some(KEM_X25519))
            .await
            .unwrap();
        let (ciphertext, _) = provider
            .encapsulate(&key_pair.public_key, Some(KEM_X25519))
            .unwrap();
        let wrong_sk = crate::crypto::random_bytes::<32>();
        let err = provider.decapsulate(&ciphertext, &wrong_sk).unwrap_err();
        assert!(matches!(err, Error::DecapsulationFailure));
    }

    #[tokio::test]
    async fn test_sign_verify_all_implementations() {
        let provider = fixture();
        for id in [SIG_MLDSA65, SIG_ED25519] {
            let key_pair = provider
                .generate_key_pair(Role::Signature, Some(id))
                .await
                .unwrap();

            let signature = provider.sign(b"approve device", &key_pair).unwrap();
            assert_eq!(signature.implementation_id, id);
            assert!(provider
                .verify(&signature, b"approve device", &key_pair.public_key)
                .unwrap());
            assert!(!provider
                .verify(&signature, b"approve nothing", &key_pair.public_key)
                .unwrap());
        }
    }

    #[tokio::test]
    async fn test_verify_with_swapped_implementation_never_true() {
        let provider = fixture();
        let key_pair = provider
            .generate_key_pair(Role::Signature, Some(SIG_MLDSA65))
            .await
            .unwrap();
        let mut signature = provider.sign(b"message", &key_pair).unwrap();
        signature.implementation_id = SIG_ED25519.to_string();

        // a different implementation than the signer used must never verify
        match provider.verify(&signature, b"message", &key_pair.public_key) {
            Ok(valid) => assert!(!valid),
            Err(e) => assert!(matches!(
                e,
                Error::ImplementationUnavailable { .. } | Error::UnknownImplementation { .. }
            )),
        }
    }

    #[tokio::test]
    async fn test_verify_with_unconfigured_implementation_fails_closed() {
        // registry only carries ml-dsa-65; a peer signature tagged ed25519
        // must be rejected, not re-verified under something else
        let config = RegistryConfig {
            kem_priority: vec![KEM_MLKEM768.to_string()],
            signature_priority: vec![SIG_MLDSA65.to_string()],
        };
        let provider = fixture_with(&config);

        let signature = Signature {
            bytes: vec![0u8; 64],
            implementation_id: SIG_ED25519.to_string(),
        };
        let err = provider
            .verify(&signature, b"message", &[0u8; 32])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownImplementation { .. }));
    }

    #[tokio::test]
    async fn test_seeded_keygen_is_deterministic_for_x25519() {
        let provider = fixture();
        // fixture sources are static, so repeated collection derives the
        // same seed
        let a = provider
            .generate_key_pair(Role::Kem, Some(KEM_X25519))
            .await
            .unwrap();
        let b = provider
            .generate_key_pair(Role::Kem, Some(KEM_X25519))
            .await
            .unwrap();
        assert_eq!(a.public_key, b.public_key);
    }

    #[tokio::test]
    async fn test_signature_serde_roundtrip() {
        let provider = fixture();
        let key_pair = provider
            .generate_key_pair(Role::Signature, Some(SIG_ED25519))
            .await
            .unwrap();
        let signature = provider.sign(b"wire", &key_pair).unwrap();

        let json = serde_json::to_string(&signature).unwrap();
        let back: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bytes, signature.bytes);
        assert_eq!(back.implementation_id, signature.implementation_id);
        assert!(provider.verify(&back, b"wire", &key_pair.public_key).unwrap());
    }
}
