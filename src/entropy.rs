//! multi-source entropy aggregation
//!
//! queries every configured source concurrently, scores what comes back,
//! and refuses to hand out a seed unless enough independent sources
//! contributed. raw sample bytes never leave this module unprotected and
//! are never persisted; only source ids survive as provenance.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::config::EntropyConfig;
use crate::crypto::unix_now;
use crate::sensitive::{SecretBytes32, SecretVec};
use crate::{Error, Result};

/// raw bytes plus the source's self-reported quality hint
pub struct SourceReading {
    pub bytes: Vec<u8>,
    pub quality_hint: f64,
}

/// one independent, untrusted randomness provider
pub trait EntropySource: Send + Sync {
    /// stable identifier, recorded as provenance
    fn id(&self) -> &str;

    /// fetch `len` bytes; a short read is not an error here, it is scored
    /// and excluded by the aggregator
    fn fetch(&self, len: usize) -> BoxFuture<'_, Result<SourceReading>>;
}

/// operating-system rng as a source
pub struct OsEntropySource;

impl EntropySource for OsEntropySource {
    fn id(&self) -> &str {
        "os-rng"
    }

    fn fetch(&self, len: usize) -> BoxFuture<'_, Result<SourceReading>> {
        Box::pin(async move {
            let mut bytes = vec![0u8; len];
            rand::rngs::OsRng.fill_bytes(&mut bytes);
            Ok(SourceReading {
                bytes,
                quality_hint: 1.0,
            })
        })
    }
}

/// remote source speaking the plain `GET -> raw bytes` contract
#[cfg(feature = "network")]
pub struct HttpEntropySource {
    id: String,
    url: String,
    quality_hint: f64,
    client: reqwest::Client,
}

#[cfg(feature = "network")]
impl HttpEntropySource {
    pub fn new(id: impl Into<String>, url: impl Into<String>, quality_hint: f64) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            quality_hint,
            client: reqwest::Client::new(),
        }
    }
}

#[cfg(feature = "network")]
impl EntropySource for HttpEntropySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn fetch(&self, len: usize) -> BoxFuture<'_, Result<SourceReading>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| Error::Network(e.to_string()))?
                .error_for_status()
                .map_err(|e| Error::Network(e.to_string()))?;
            let body = resp
                .bytes()
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
            let bytes = body[..body.len().min(len)].to_vec();
            Ok(SourceReading {
                bytes,
                quality_hint: self.quality_hint,
            })
        })
    }
}

/// in-process source with a fixed reading, for tests and offline setups
pub struct StaticEntropySource {
    id: String,
    bytes: Vec<u8>,
    quality_hint: f64,
}

impl StaticEntropySource {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>, quality_hint: f64) -> Self {
        Self {
            id: id.into(),
            bytes,
            quality_hint,
        }
    }
}

impl EntropySource for StaticEntropySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn fetch(&self, _len: usize) -> BoxFuture<'_, Result<SourceReading>> {
        Box::pin(async move {
            Ok(SourceReading {
                bytes: self.bytes.clone(),
                quality_hint: self.quality_hint,
            })
        })
    }
}

/// one accepted (or excluded) sample; bytes are consumed immediately to
/// derive seeds and never persisted
#[derive(Debug)]
pub struct EntropySample {
    pub source_id: String,
    pub bytes: SecretVec,
    pub collected_at: u64,
    pub quality_score: f64,
    pub degraded: bool,
}

/// aggregated seed with provenance
pub struct Seed {
    bytes: SecretBytes32,
    provenance: Vec<String>,
}

impl Seed {
    /// ids of the sources that contributed
    pub fn provenance(&self) -> &[String] {
        &self.provenance
    }

    /// derive a domain-separated sub-key
    pub fn derive(&self, context: &str) -> Zeroizing<[u8; 32]> {
        crate::crypto::derive_key(context, self.bytes.as_bytes())
    }

    /// derive a domain-separated deterministic rng
    pub fn rng(&self, context: &str) -> ChaCha20Rng {
        ChaCha20Rng::from_seed(*self.derive(context))
    }
}

/// fan-out collector over all configured sources
pub struct EntropyAggregator {
    config: EntropyConfig,
    sources: Vec<Arc<dyn EntropySource>>,
}

impl EntropyAggregator {
    pub fn new(config: EntropyConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
        }
    }

    pub fn add_source(&mut self, source: Arc<dyn EntropySource>) {
        self.sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// collect with the configured minimum and deadline
    pub async fn collect(&self) -> Result<Vec<EntropySample>> {
        self.collect_with(self.config.min_sources, self.config.timeout())
            .await
    }

    /// query all sources concurrently; sources that fail, time out, return a
    /// short read, or score below the quality floor are excluded, never
    /// padded. fails with `EntropyUnavailable` unless at least `min_sources`
    /// acceptable samples arrive before the deadline.
    pub async fn collect_with(
        &self,
        min_sources: usize,
        timeout: std::time::Duration,
    ) -> Result<Vec<EntropySample>> {
        let len = self.config.sample_len;
        let floor = self.config.quality_floor;
        let deadline = tokio::time::Instant::now() + timeout;

        let mut pending: FuturesUnordered<_> = self
            .sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                async move {
                    let result = tokio::time::timeout_at(deadline, source.fetch(len)).await;
                    (source, result)
                }
            })
            .collect();

        let mut accepted = Vec::new();
        while let Some((source, result)) = pending.next().await {
            match result {
                Ok(Ok(reading)) => {
                    let sample = score_sample(source.id(), reading, len, floor);
                    if sample.degraded {
                        warn!(
                            source = source.id(),
                            score = sample.quality_score,
                            "entropy sample excluded"
                        );
                    } else {
                        accepted.push(sample);
                    }
                }
                Ok(Err(e)) => {
                    warn!(source = source.id(), error = %e, "entropy source failed");
                }
                Err(_) => {
                    warn!(source = source.id(), "entropy source timed out");
                }
            }
        }

        if accepted.len() < min_sources {
            return Err(Error::EntropyUnavailable {
                responded: accepted.len(),
                required: min_sources,
            });
        }
        Ok(accepted)
    }

    /// combine accepted samples into one seed via a domain-separated hash
    pub fn seed(&self, samples: &[EntropySample]) -> Result<Seed> {
        if samples.len() < self.config.min_sources {
            return Err(Error::EntropyUnavailable {
                responded: samples.len(),
                required: self.config.min_sources,
            });
        }

        let mut hasher = blake3::Hasher::new_derive_key("keyquorum:entropy-seed:v1");
        hasher.update(&(samples.len() as u32).to_le_bytes());
        for sample in samples {
            hasher.update(&(sample.source_id.len() as u32).to_le_bytes());
            hasher.update(sample.source_id.as_bytes());
            hasher.update(&(sample.bytes.len() as u32).to_le_bytes());
            hasher.update(sample.bytes.as_bytes());
        }
        let digest = hasher.finalize();

        let provenance: Vec<String> = samples.iter().map(|s| s.source_id.clone()).collect();
        debug!(sources = ?provenance, "derived aggregated seed");

        Ok(Seed {
            bytes: SecretBytes32::new(*digest.as_bytes()),
            provenance,
        })
    }

    /// collect and combine in one step
    pub async fn gather_seed(&self) -> Result<Seed> {
        let samples = self.collect().await?;
        self.seed(&samples)
    }
}

/// clamp the self-reported hint and penalize statistically suspect bytes
fn score_sample(source_id: &str, reading: SourceReading, requested: usize, floor: f64) -> EntropySample {
    let (score, degraded) = if reading.bytes.len() < requested {
        // short read: excluded outright, never padded
        (0.0, true)
    } else {
        let mut seen = [false; 256];
        let mut distinct = 0usize;
        for &b in &reading.bytes {
            if !seen[b as usize] {
                seen[b as usize] = true;
                distinct += 1;
            }
        }
        let spread = distinct as f64 / reading.bytes.len().min(256) as f64;
        let score = (reading.quality_hint.clamp(0.0, 1.0) * spread).clamp(0.0, 1.0);
        (score, score < floor)
    };

    EntropySample {
        source_id: source_id.to_string(),
        bytes: SecretVec::new(reading.bytes),
        collected_at: unix_now(),
        quality_score: score,
        degraded,
    }
}
