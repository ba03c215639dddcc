//! dh-kem backend over x25519
//!
//! the ciphertext is the ephemeral public key; the shared secret is the
//! diffie-hellman output bound to both public keys under a fixed
//! derivation context.

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::{KemBackend, KEM_X25519};
use crate::sensitive::{SecretBytes32, SecretVec};
use crate::{Error, Result};

const KEYGEN_CONTEXT: &str = "keyquorum:keygen:kem-x25519:v1";
const SHARED_CONTEXT: &str = "keyquorum:kem-x25519-shared:v1";

pub struct X25519Kem;

fn shared_key(eph_pk: &[u8; 32], recipient_pk: &[u8; 32], dh: &[u8; 32]) -> SecretBytes32 {
    let mut material = Zeroizing::new(Vec::with_capacity(96));
    material.extend_from_slice(eph_pk);
    material.extend_from_slice(recipient_pk);
    material.extend_from_slice(dh);
    SecretBytes32::new(blake3::derive_key(SHARED_CONTEXT, &material))
}

impl KemBackend for X25519Kem {
    fn id(&self) -> &'static str {
        KEM_X25519
    }

    fn public_key_len(&self) -> usize {
        32
    }

    fn secret_key_len(&self) -> usize {
        32
    }

    fn ciphertext_len(&self) -> usize {
        32
    }

    fn shared_secret_len(&self) -> usize {
        32
    }

    fn generate(&self, seed: Option<&[u8; 32]>) -> Result<(Vec<u8>, SecretVec)> {
        let secret = match seed {
            Some(seed) => StaticSecret::from(*crate::crypto::derive_key(KEYGEN_CONTEXT, seed)),
            None => StaticSecret::random_from_rng(OsRng),
        };
        let public = PublicKey::from(&secret);
        Ok((
            public.as_bytes().to_vec(),
            SecretVec::new(secret.to_bytes().to_vec()),
        ))
    }

    fn encapsulate(&self, public_key: &[u8]) -> Result<(Vec<u8>, SecretBytes32)> {
        let recipient: [u8; 32] = public_key
            .try_into()
            .map_err(|_| Error::InvalidKey("x25519 public key length".into()))?;
        let recipient_pk = PublicKey::from(recipient);

        let eph = EphemeralSecret::random_from_rng(OsRng);
        let eph_pk = PublicKey::from(&eph);
        let dh = eph.diffie_hellman(&recipient_pk);

        let shared = shared_key(eph_pk.as_bytes(), &recipient, dh.as_bytes());
        Ok((eph_pk.as_bytes().to_vec(), shared))
    }

    fn decapsulate(&self, ciphertext: &[u8], secret_key: &[u8]) -> Result<SecretBytes32> {
        let eph: [u8; 32] = ciphertext.try_into().map_err(|_| Error::DecapsulationFailure)?;
        let sk_bytes: [u8; 32] = secret_key
            .try_into()
            .map_err(|_| Error::DecapsulationFailure)?;

        let secret = StaticSecret::from(sk_bytes);
        let own_pk = PublicKey::from(&secret);
        let dh = secret.diffie_hellman(&PublicKey::from(eph));

        Ok(shared_key(&eph, own_pk.as_bytes(), dh.as_bytes()))
    }
}
