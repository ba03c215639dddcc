//! guardian threshold recovery
//!
//! splits an account master key into an (n, k) shamir scheme, wraps each
//! share for its guardian through the kem provider, and reconstructs the
//! key from any k opened shares. the server-side share rows are useless
//! without guardian secret keys, and a share set is only ever replaced
//! atomically; a mixed old/new set must never be combinable.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crypto;
use crate::entropy::EntropyAggregator;
use crate::provider::{CryptoProvider, KemCiphertext};
use crate::sensitive::{MasterKey, SecretVec};
use crate::shamir::{self, ShamirShare};
use crate::{Error, Result};

const COEFFICIENT_CONTEXT: &str = "keyquorum:shamir-coefficients:v1";
const GUARDIAN_WRAP_INFO: &[u8] = b"keyquorum:guardian-wrap:v1";

/// (n, k) threshold policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    pub n: u8,
    pub k: u8,
}

impl ThresholdPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.n == 0 || self.k == 0 || self.k > self.n {
            return Err(Error::InvalidThreshold {
                n: self.n,
                k: self.k,
            });
        }
        Ok(())
    }
}

/// a guardian's recovery public key
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Guardian {
    pub guardian_id: String,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub kem_public_key: Vec<u8>,
    pub implementation_id: String,
}

/// one stored share row: the share is encrypted under a key only the
/// guardian can decapsulate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardianShare {
    pub guardian_id: String,
    pub share_index: u8,
    #[serde(with = "crate::encoding::hex_bytes")]
    pub encrypted_share: Vec<u8>,
    #[serde(with = "crate::encoding::hex_array")]
    pub share_nonce: [u8; crypto::NONCE_LEN],
    pub kem_ciphertext: KemCiphertext,
    pub implementation_id: String,
    #[serde(with = "crate::encoding::hex_array")]
    pub checksum: [u8; crypto::TAG_LEN],
}

/// a guardian-decrypted share in transit to reconstruction
#[derive(Debug)]
pub struct OpenedShare {
    pub share_index: u8,
    pub data: SecretVec,
    pub checksum: [u8; crypto::TAG_LEN],
}

impl OpenedShare {
    /// integrity check, run before a share may enter the combination
    pub fn verify(&self) -> bool {
        crypto::verify_share_checksum(self.share_index, self.data.as_bytes(), &self.checksum)
    }
}

struct ShareSetRecord {
    policy: ThresholdPolicy,
    generation: u64,
    created_at: u64,
    shares: Vec<GuardianShare>,
}

pub struct ThresholdRecoveryManager {
    provider: Arc<CryptoProvider>,
    entropy: Arc<EntropyAggregator>,
    sets: RwLock<HashMap<String, ShareSetRecord>>,
}

impl ThresholdRecoveryManager {
    pub fn new(provider: Arc<CryptoProvider>, entropy: Arc<EntropyAggregator>) -> Self {
        Self {
            provider,
            entropy,
            sets: RwLock::new(HashMap::new()),
        }
    }

    /// create the initial share set for an account
    ///
    /// fails if a set already exists; changing guardians afterwards goes
    /// through `rekey` so generations stay strictly increasing
    pub async fn split(
        &self,
        account_id: &str,
        master_key: &MasterKey,
        policy: ThresholdPolicy,
        guardians: &[Guardian],
    ) -> Result<Vec<GuardianShare>> {
        let rows = self.build_shares(master_key, policy, guardians).await?;

        let mut sets = self.sets.write().expect("share set lock");
        if sets.contains_key(account_id) {
            return Err(Error::Config(format!(
                "share set already exists for account {account_id}; use rekey"
            )));
        }
        sets.insert(
            account_id.to_string(),
            ShareSetRecord {
                policy,
                generation: 1,
                created_at: crypto::unix_now(),
                shares: rows.clone(),
            },
        );
        info!(account_id, n = policy.n, k = policy.k, "guardian share set created");
        Ok(rows)
    }

    /// re-split with a fresh polynomial and atomically replace every row
    ///
    /// `expected_generation` is the optimistic-concurrency token: a losing
    /// concurrent re-key observes `StaleGeneration` and must re-read
    pub async fn rekey(
        &self,
        account_id: &str,
        master_key: &MasterKey,
        policy: ThresholdPolicy,
        guardians: &[Guardian],
        expected_generation: u64,
    ) -> Result<Vec<GuardianShare>> {
        let rows = self.build_shares(master_key, policy, guardians).await?;

        let mut sets = self.sets.write().expect("share set lock");
        let record = sets
            .get_mut(account_id)
            .ok_or_else(|| Error::UnknownAccount {
                account_id: account_id.to_string(),
            })?;
        if record.generation != expected_generation {
            return Err(Error::StaleGeneration {
                expected: expected_generation,
                found: record.generation,
            });
        }
        record.policy = policy;
        record.generation += 1;
        record.created_at = crypto::unix_now();
        record.shares = rows.clone();
        info!(
            account_id,
            generation = record.generation,
            n = policy.n,
            k = policy.k,
            "guardian share set replaced"
        );
        Ok(rows)
    }

    async fn build_shares(
        &self,
        master_key: &MasterKey,
        policy: ThresholdPolicy,
        guardians: &[Guardian],
    ) -> Result<Vec<GuardianShare>> {
        policy.validate()?;
        if guardians.len() != policy.n as usize {
            return Err(Error::Config(format!(
                "expected {} guardians, got {}",
                policy.n,
                guardians.len()
            )));
        }

        // coefficients come from aggregated entropy, not a default generator
        let seed = self.entropy.gather_seed().await?;
        let mut rng = seed.rng(COEFFICIENT_CONTEXT);
        let raw_shares = shamir::split(master_key.as_bytes(), policy.n, policy.k, &mut rng)?;

        let mut rows = Vec::with_capacity(raw_shares.len());
        for (guardian, share) in guardians.iter().zip(raw_shares.iter()) {
            let (kem_ciphertext, shared) = self
                .provider
                .encapsulate(&guardian.kem_public_key, Some(&guardian.implementation_id))?;
            let wrap_key = crypto::derive_wrap_key(
                shared.as_bytes(),
                &[
                    GUARDIAN_WRAP_INFO,
                    guardian.guardian_id.as_bytes(),
                    &[share.index],
                ],
            )?;
            let share_nonce: [u8; crypto::NONCE_LEN] = crypto::random_bytes();
            let encrypted_share = crypto::encrypt(
                &wrap_key,
                &share_nonce,
                share.data.as_bytes(),
                guardian.guardian_id.as_bytes(),
            )?;

            rows.push(GuardianShare {
                guardian_id: guardian.guardian_id.clone(),
                share_index: share.index,
                encrypted_share,
                share_nonce,
                kem_ciphertext,
                implementation_id: guardian.implementation_id.clone(),
                checksum: crypto::share_checksum(share.index, share.data.as_bytes()),
            });
        }
        Ok(rows)
    }

    /// decapsulate and decrypt one share with the guardian's secret key
    pub fn open_share(
        &self,
        share: &GuardianShare,
        guardian_secret_key: &[u8],
    ) -> Result<OpenedShare> {
        let shared = self
            .provider
            .decapsulate(&share.kem_ciphertext, guardian_secret_key)?;
        let wrap_key = crypto::derive_wrap_key(
            shared.as_bytes(),
            &[
                GUARDIAN_WRAP_INFO,
                share.guardian_id.as_bytes(),
                &[share.share_index],
            ],
        )?;
        let data = crypto::decrypt(
            &wrap_key,
            &share.share_nonce,
            &share.encrypted_share,
            share.guardian_id.as_bytes(),
        )
        .map_err(|_| Error::DecapsulationFailure)?;

        Ok(OpenedShare {
            share_index: share.share_index,
            data: SecretVec::new(data),
            checksum: share.checksum,
        })
    }

    /// reconstruct the master key from opened shares for a known account
    ///
    /// each share must match the checksum stored with the current share set,
    /// so leftovers from a previous generation are excluded rather than
    /// silently combined into garbage
    pub fn reconstruct(&self, account_id: &str, shares: &[OpenedShare]) -> Result<MasterKey> {
        let (k, stored_checksums) = {
            let sets = self.sets.read().expect("share set lock");
            let record = sets.get(account_id).ok_or_else(|| Error::UnknownAccount {
                account_id: account_id.to_string(),
            })?;
            let checksums: HashMap<u8, [u8; crypto::TAG_LEN]> = record
                .shares
                .iter()
                .map(|s| (s.share_index, s.checksum))
                .collect();
            (record.policy.k as usize, checksums)
        };
        Self::combine_valid(shares, k, Some(&stored_checksums))
    }

    /// reconstruct with an explicit threshold, without set bookkeeping
    pub fn reconstruct_with(&self, shares: &[OpenedShare], k: usize) -> Result<MasterKey> {
        Self::combine_valid(shares, k, None)
    }

    fn combine_valid(
        shares: &[OpenedShare],
        k: usize,
        stored_checksums: Option<&HashMap<u8, [u8; crypto::TAG_LEN]>>,
    ) -> Result<MasterKey> {
        let mut valid: Vec<ShamirShare> = Vec::new();
        let mut bad_indices: Vec<u8> = Vec::new();

        for share in shares {
            let matches_set = stored_checksums
                .map(|stored| stored.get(&share.share_index) == Some(&share.checksum))
                .unwrap_or(true);
            if !matches_set || !share.verify() {
                warn!(index = share.share_index, "share failed integrity check, excluded");
                bad_indices.push(share.share_index);
                continue;
            }
            if valid.iter().any(|s| s.index == share.share_index) {
                continue;
            }
            valid.push(ShamirShare {
                index: share.share_index,
                data: share.data.clone(),
            });
        }

        if valid.len() < k {
            return Err(if bad_indices.is_empty() {
                Error::ThresholdNotMet {
                    valid: valid.len(),
                    required: k,
                }
            } else {
                Error::ShareIntegrityFailure {
                    bad_indices,
                    valid: valid.len(),
                    required: k,
                }
            });
        }

        let secret = shamir::combine(&valid, k)?;
        MasterKey::from_slice(secret.as_bytes()).ok_or(Error::InvalidShareFormat)
    }

    /// current rows for an account
    pub fn shares(&self, account_id: &str) -> Result<Vec<GuardianShare>> {
        let sets = self.sets.read().expect("share set lock");
        sets.get(account_id)
            .map(|record| record.shares.clone())
            .ok_or_else(|| Error::UnknownAccount {
                account_id: account_id.to_string(),
            })
    }

    /// current generation for an account, the token `rekey` expects
    pub fn generation(&self, account_id: &str) -> Result<u64> {
        let sets = self.sets.read().expect("share set lock");
        sets.get(account_id)
            .map(|record| record.generation)
            .ok_or_else(|| Error::UnknownAccount {
                account_id: account_id.to_string(),
            })
    }

    /// creation time of the current set
    pub fn created_at(&self, account_id: &str) -> Result<u64> {
        let sets = self.sets.read().expect("share set lock");
        sets.get(account_id)
            .map(|record| record.created_at)
            .ok_or_else(|| Error::UnknownAccount {
                account_id: account_id.to_string(),
            })
    }
}
