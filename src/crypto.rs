//! symmetric primitives shared across the core
//!
//! - chacha20poly1305 for authenticated encryption
//! - blake3 derive_key for domain-separated key derivation
//! - hkdf-sha256 for expanding kem shared secrets into wrapping keys
//! - hmac-sha256 for confirmation and integrity tags

use chacha20poly1305::{
    aead::{Aead, KeyInit as AeadKeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use hmac::{digest::KeyInit, Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// aead nonce length
pub const NONCE_LEN: usize = 12;

/// symmetric key length
pub const KEY_LEN: usize = 32;

/// truncated tag length for key confirmation and share checksums
pub const TAG_LEN: usize = 16;

/// generate random bytes from the operating-system rng
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// encrypt with chacha20poly1305, binding `aad`
pub fn encrypt(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher: ChaCha20Poly1305 = AeadKeyInit::new_from_slice(key)
        .map_err(|e| Error::EncryptionFailed(e.to_string()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|e| Error::EncryptionFailed(e.to_string()))
}

/// decrypt with chacha20poly1305, checking `aad`
pub fn decrypt(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher: ChaCha20Poly1305 = AeadKeyInit::new_from_slice(key)
        .map_err(|e| Error::DecryptionFailed(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|e| Error::DecryptionFailed(e.to_string()))
}

/// domain-separated key derivation via blake3
pub fn derive_key(context: &str, material: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    Zeroizing::new(blake3::derive_key(context, material))
}

/// expand a kem shared secret into a wrapping key, binding `info` parts
pub fn derive_wrap_key(shared_secret: &[u8], info: &[&[u8]]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let joined: Vec<u8> = info.concat();
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(&joined, okm.as_mut_slice())
        .map_err(|_| Error::InvalidKey("hkdf expand failed".into()))?;
    Ok(okm)
}

/// compute hmac-sha256 over the concatenation of `data` parts
pub fn mac(key: &[u8], data: &[&[u8]]) -> [u8; 32] {
    let mut h: HmacSha256 = KeyInit::new_from_slice(key).expect("hmac accepts any key length");
    for d in data {
        Mac::update(&mut h, d);
    }
    h.finalize().into_bytes().into()
}

/// key-confirmation tag over a kem ciphertext, keyed by the shared secret
pub fn confirmation_tag(shared_secret: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
    let tag = mac(shared_secret, &[b"keyquorum:kem-confirm:v1", ciphertext]);
    tag[..TAG_LEN].try_into().expect("tag length")
}

/// constant-time check of a key-confirmation tag
pub fn verify_confirmation_tag(shared_secret: &[u8], ciphertext: &[u8], tag: &[u8; TAG_LEN]) -> bool {
    let mut h: HmacSha256 =
        KeyInit::new_from_slice(shared_secret).expect("hmac accepts any key length");
    Mac::update(&mut h, b"keyquorum:kem-confirm:v1");
    Mac::update(&mut h, ciphertext);
    h.verify_truncated_left(tag).is_ok()
}

/// integrity checksum over one threshold share
pub fn share_checksum(index: u8, data: &[u8]) -> [u8; TAG_LEN] {
    let tag = mac(b"keyquorum:share-checksum:v1", &[&[index], data]);
    tag[..TAG_LEN].try_into().expect("tag length")
}

/// constant-time check of a share checksum
pub fn verify_share_checksum(index: u8, data: &[u8], checksum: &[u8; TAG_LEN]) -> bool {
    let mut h: HmacSha256 =
        KeyInit::new_from_slice(b"keyquorum:share-checksum:v1").expect("hmac accepts any key length");
    Mac::update(&mut h, &[index]);
    Mac::update(&mut h, data);
    h.verify_truncated_left(checksum).is_ok()
}

/// current unix time in seconds
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
