//! ml-kem-768 backend via the pqclean bindings

use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};

use super::{KemBackend, KEM_MLKEM768};
use crate::sensitive::{SecretBytes32, SecretVec};
use crate::{Error, Result};

pub struct MlKem768;

impl KemBackend for MlKem768 {
    fn id(&self) -> &'static str {
        KEM_MLKEM768
    }

    fn public_key_len(&self) -> usize {
        mlkem768::public_key_bytes()
    }

    fn secret_key_len(&self) -> usize {
        mlkem768::secret_key_bytes()
    }

    fn ciphertext_len(&self) -> usize {
        mlkem768::ciphertext_bytes()
    }

    fn shared_secret_len(&self) -> usize {
        mlkem768::shared_secret_bytes()
    }

    fn generate(&self, _seed: Option<&[u8; 32]>) -> Result<(Vec<u8>, SecretVec)> {
        // pqclean binds its own system rng; the seed cannot be injected here
        let (pk, sk) = mlkem768::keypair();
        Ok((pk.as_bytes().to_vec(), SecretVec::new(sk.as_bytes().to_vec())))
    }

    fn encapsulate(&self, public_key: &[u8]) -> Result<(Vec<u8>, SecretBytes32)> {
        let pk = mlkem768::PublicKey::from_bytes(public_key)
            .map_err(|e| Error::InvalidKey(format!("ml-kem-768 public key: {e}")))?;
        let (ss, ct) = mlkem768::encapsulate(&pk);
        let shared = SecretBytes32::from_slice(ss.as_bytes()).ok_or(Error::DecapsulationFailure)?;
        Ok((ct.as_bytes().to_vec(), shared))
    }

    fn decapsulate(&self, ciphertext: &[u8], secret_key: &[u8]) -> Result<SecretBytes32> {
        let sk =
            mlkem768::SecretKey::from_bytes(secret_key).map_err(|_| Error::DecapsulationFailure)?;
        let ct =
            mlkem768::Ciphertext::from_bytes(ciphertext).map_err(|_| Error::DecapsulationFailure)?;
        let ss = mlkem768::decapsulate(&ct, &sk);
        SecretBytes32::from_slice(ss.as_bytes()).ok_or(Error::DecapsulationFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let backend = MlKem768;
        let (pk, sk) = backend.generate(None).unwrap();
        assert_eq!(pk.len(), backend.public_key_len());
        assert_eq!(sk.len(), backend.secret_key_len());

        let (ct, ss_enc) = backend.encapsulate(&pk).unwrap();
        assert_eq!(ct.len(), backend.ciphertext_len());

        let ss_dec = backend.decapsulate(&ct, sk.as_bytes()).unwrap();
        assert_eq!(ss_enc.as_bytes(), ss_dec.as_bytes());
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        let backend = MlKem768;
        assert!(backend.encapsulate(&[0u8; 3]).is_err());
        assert!(backend.decapsulate(&[0u8; 3], &[0u8; 3]).is_err());
    }
}
