//! ml-dsa-65 backend via the pqclean bindings

use pqcrypto_mldsa::mldsa65;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};

use super::{SignatureBackend, SIG_MLDSA65};
use crate::sensitive::SecretVec;
use crate::{Error, Result};

pub struct MlDsa65;

impl SignatureBackend for MlDsa65 {
    fn id(&self) -> &'static str {
        SIG_MLDSA65
    }

    fn public_key_len(&self) -> usize {
        mldsa65::public_key_bytes()
    }

    fn secret_key_len(&self) -> usize {
        mldsa65::secret_key_bytes()
    }

    fn signature_len(&self) -> usize {
        mldsa65::signature_bytes()
    }

    fn generate(&self, _seed: Option<&[u8; 32]>) -> Result<(Vec<u8>, SecretVec)> {
        // pqclean binds its own system rng; the seed cannot be injected here
        let (pk, sk) = mldsa65::keypair();
        Ok((pk.as_bytes().to_vec(), SecretVec::new(sk.as_bytes().to_vec())))
    }

    fn sign(&self, message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>> {
        let sk = mldsa65::SecretKey::from_bytes(secret_key)
            .map_err(|e| Error::InvalidKey(format!("ml-dsa-65 secret key: {e}")))?;
        let sig = mldsa65::detached_sign(message, &sk);
        Ok(sig.as_bytes().to_vec())
    }

    fn verify(&self, signature: &[u8], message: &[u8], public_key: &[u8]) -> Result<bool> {
        let pk = mldsa65::PublicKey::from_bytes(public_key)
            .map_err(|e| Error::InvalidKey(format!("ml-dsa-65 public key: {e}")))?;
        let sig = match mldsa65::DetachedSignature::from_bytes(signature) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };
        Ok(mldsa65::verify_detached_signature(&sig, message, &pk).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let backend = MlDsa65;
        let (pk, sk) = backend.generate(None).unwrap();

        let sig = backend.sign(b"recovery request", sk.as_bytes()).unwrap();
        assert_eq!(sig.len(), backend.signature_len());
        assert!(backend.verify(&sig, b"recovery request", &pk).unwrap());
        assert!(!backend.verify(&sig, b"tampered message", &pk).unwrap());
    }

    #[test]
    fn test_malformed_signature_is_false_not_error() {
        let backend = MlDsa65;
        let (pk, _) = backend.generate(None).unwrap();
        assert!(!backend.verify(&[0u8; 4], b"msg", &pk).unwrap());
    }
}
