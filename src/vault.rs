//! per-item vault envelopes
//!
//! every item gets its own data-encryption key; the master key only ever
//! wraps deks, never bulk data. losing one dek loses one item.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto;
use crate::sensitive::{MasterKey, SecretVec};
use crate::{Error, Result};

const DEK_WRAP_CONTEXT: &str = "keyquorum:dek-wrap:v1";

/// one encrypted vault record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultItemEnvelope {
    pub item_id: String,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub wrapped_dek: Vec<u8>,
    #[serde(with = "crate::encoding::hex_array")]
    pub dek_nonce: [u8; crypto::NONCE_LEN],
    #[serde(with = "crate::encoding::hex_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::encoding::hex_array")]
    pub nonce: [u8; crypto::NONCE_LEN],
}

/// encrypt one item under a fresh dek, wrapping the dek under the master key
pub fn encrypt_item(
    item_id: &str,
    plaintext: &[u8],
    master_key: &MasterKey,
) -> Result<VaultItemEnvelope> {
    let dek = SecretVec::new(crypto::random_bytes::<{ crypto::KEY_LEN }>().to_vec());
    seal_with_dek(item_id, plaintext, master_key, &dek)
}

/// decrypt one item; any wrong key or tampering fails closed
pub fn decrypt_item(envelope: &VaultItemEnvelope, master_key: &MasterKey) -> Result<SecretVec> {
    let wrap_key = crypto::derive_key(DEK_WRAP_CONTEXT, master_key.as_bytes());
    let dek_bytes = Zeroizing::new(
        crypto::decrypt(
            &wrap_key,
            &envelope.dek_nonce,
            &envelope.wrapped_dek,
            envelope.item_id.as_bytes(),
        )
        .map_err(|_| Error::DecapsulationFailure)?,
    );
    let dek: Zeroizing<[u8; crypto::KEY_LEN]> = Zeroizing::new(
        dek_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::DecapsulationFailure)?,
    );

    let plaintext = crypto::decrypt(
        &dek,
        &envelope.nonce,
        &envelope.ciphertext,
        envelope.item_id.as_bytes(),
    )
    .map_err(|_| Error::DecapsulationFailure)?;
    Ok(SecretVec::new(plaintext))
}

/// re-encrypt an item on update, optionally keeping its dek
pub fn re_encrypt_item(
    envelope: &VaultItemEnvelope,
    plaintext: &[u8],
    master_key: &MasterKey,
    fresh_dek: bool,
) -> Result<VaultItemEnvelope> {
    if fresh_dek {
        return encrypt_item(&envelope.item_id, plaintext, master_key);
    }

    let wrap_key = crypto::derive_key(DEK_WRAP_CONTEXT, master_key.as_bytes());
    let dek = SecretVec::new(
        crypto::decrypt(
            &wrap_key,
            &envelope.dek_nonce,
            &envelope.wrapped_dek,
            envelope.item_id.as_bytes(),
        )
        .map_err(|_| Error::DecapsulationFailure)?,
    );

    seal_with_dek(&envelope.item_id, plaintext, master_key, &dek)
}

fn seal_with_dek(
    item_id: &str,
    plaintext: &[u8],
    master_key: &MasterKey,
    dek: &SecretVec,
) -> Result<VaultItemEnvelope> {
    let dek_array: Zeroizing<[u8; crypto::KEY_LEN]> = Zeroizing::new(
        dek.as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidKey("dek must be 32 bytes".into()))?,
    );

    let nonce: [u8; crypto::NONCE_LEN] = crypto::random_bytes();
    let ciphertext = crypto::encrypt(&dek_array, &nonce, plaintext, item_id.as_bytes())?;

    let wrap_key = crypto::derive_key(DEK_WRAP_CONTEXT, master_key.as_bytes());
    let dek_nonce: [u8; crypto::NONCE_LEN] = crypto::random_bytes();
    let wrapped_dek = crypto::encrypt(&wrap_key, &dek_nonce, dek.as_bytes(), item_id.as_bytes())?;

    Ok(VaultItemEnvelope {
        item_id: item_id.to_string(),
        wrapped_dek,
        dek_nonce,
        ciphertext,
        nonce,
    })
}
