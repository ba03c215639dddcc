//! ed25519 backend

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use super::{SignatureBackend, SIG_ED25519};
use crate::sensitive::SecretVec;
use crate::{Error, Result};

const KEYGEN_CONTEXT: &str = "keyquorum:keygen:sig-ed25519:v1";

pub struct Ed25519Sig;

impl SignatureBackend for Ed25519Sig {
    fn id(&self) -> &'static str {
        SIG_ED25519
    }

    fn public_key_len(&self) -> usize {
        32
    }

    fn secret_key_len(&self) -> usize {
        32
    }

    fn signature_len(&self) -> usize {
        64
    }

    fn generate(&self, seed: Option<&[u8; 32]>) -> Result<(Vec<u8>, SecretVec)> {
        let signing_key = match seed {
            Some(seed) => SigningKey::from_bytes(&crate::crypto::derive_key(KEYGEN_CONTEXT, seed)),
            None => SigningKey::generate(&mut OsRng),
        };
        let verifying_key = signing_key.verifying_key();
        Ok((
            verifying_key.to_bytes().to_vec(),
            SecretVec::new(signing_key.to_bytes().to_vec()),
        ))
    }

    fn sign(&self, message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>> {
        let sk_bytes: [u8; 32] = secret_key
            .try_into()
            .map_err(|_| Error::InvalidKey("ed25519 secret key length".into()))?;
        let signing_key = SigningKey::from_bytes(&sk_bytes);
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, signature: &[u8], message: &[u8], public_key: &[u8]) -> Result<bool> {
        let pk_bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| Error::InvalidKey("ed25519 public key length".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&pk_bytes)
            .map_err(|e| Error::InvalidKey(format!("ed25519 public key: {e}")))?;
        let sig = match Signature::from_slice(signature) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };
        Ok(verifying_key.verify(message, &sig).is_ok())
    }
}
