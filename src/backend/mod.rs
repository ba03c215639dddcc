//! pluggable kem and signature backends
//!
//! a backend wraps exactly one concrete algorithm implementation. the
//! registry self-tests every candidate once at startup and components
//! dispatch through it afterwards; nothing probes per call.
//!
//! candidates:
//! - kem: ml-kem-768 (pqclean), dh-kem over x25519
//! - signature: ml-dsa-65 (pqclean), ed25519

pub mod ed25519;
pub mod mldsa;
pub mod mlkem;
pub mod x25519;

use std::sync::Arc;

use crate::sensitive::{SecretBytes32, SecretVec};
use crate::Result;

pub const KEM_MLKEM768: &str = "kem-mlkem768";
pub const KEM_X25519: &str = "kem-x25519";
pub const SIG_MLDSA65: &str = "sig-mldsa65";
pub const SIG_ED25519: &str = "sig-ed25519";

/// key-encapsulation backend
pub trait KemBackend: Send + Sync {
    fn id(&self) -> &'static str;
    fn public_key_len(&self) -> usize;
    fn secret_key_len(&self) -> usize;
    fn ciphertext_len(&self) -> usize;
    fn shared_secret_len(&self) -> usize;

    /// generate a key pair; `seed` drives derivation where the upstream
    /// implementation accepts caller randomness
    fn generate(&self, seed: Option<&[u8; 32]>) -> Result<(Vec<u8>, SecretVec)>;

    /// returns (ciphertext, shared secret)
    fn encapsulate(&self, public_key: &[u8]) -> Result<(Vec<u8>, SecretBytes32)>;

    fn decapsulate(&self, ciphertext: &[u8], secret_key: &[u8]) -> Result<SecretBytes32>;
}

/// signature backend
pub trait SignatureBackend: Send + Sync {
    fn id(&self) -> &'static str;
    fn public_key_len(&self) -> usize;
    fn secret_key_len(&self) -> usize;
    fn signature_len(&self) -> usize;

    /// generate a key pair; `seed` drives derivation where the upstream
    /// implementation accepts caller randomness
    fn generate(&self, seed: Option<&[u8; 32]>) -> Result<(Vec<u8>, SecretVec)>;

    fn sign(&self, message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>>;

    /// `Ok(false)` covers both a bad signature and a malformed one; errors
    /// are reserved for unusable key material
    fn verify(&self, signature: &[u8], message: &[u8], public_key: &[u8]) -> Result<bool>;
}

/// every kem implementation this build carries, in no particular order
pub fn kem_candidates() -> Vec<Arc<dyn KemBackend>> {
    vec![Arc::new(mlkem::MlKem768), Arc::new(x25519::X25519Kem)]
}

/// every signature implementation this build carries, in no particular order
pub fn signature_candidates() -> Vec<Arc<dyn SignatureBackend>> {
    vec![Arc::new(mldsa::MlDsa65), Arc::new(ed25519::Ed25519Sig)]
}
