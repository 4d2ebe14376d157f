//! Fingerprint and image-identity deduplication of the merged pool.

use std::collections::HashSet;

use tracing::{debug, error};

use crate::config::DedupConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::normalize::fold_width;
use crate::types::{CandidateRecord, Gender};

/// Identity key of a candidate. Equal fingerprints mean the same animal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// Normalized `(name, color, age, gender)`; empty string for absent.
    Fields([String; 4]),
    /// Seeded hash of the whole record, used when too few fields are known
    /// for the tuple to mean anything.
    Content(String),
}

impl Fingerprint {
    pub fn of(record: &CandidateRecord, seed: u64) -> Self {
        let gender = match record.gender {
            Some(Gender::Male | Gender::Female) => record.gender.map(|g| g.as_str().to_string()),
            _ => None,
        };
        let parts = [
            key_part(record.name.as_deref()),
            key_part(record.color.as_deref()),
            key_part(record.age_estimate.as_deref()),
            gender.unwrap_or_default(),
        ];

        if parts.iter().filter(|p| p.is_empty()).count() >= 3 {
            return Fingerprint::Content(content_hash(record, seed));
        }
        Fingerprint::Fields(parts)
    }

    pub fn is_content(&self) -> bool {
        matches!(self, Fingerprint::Content(_))
    }
}

fn key_part(value: Option<&str>) -> String {
    value
        .map(|v| {
            fold_width(v)
                .chars()
                .filter(|c| !c.is_whitespace())
                .flat_map(char::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

fn content_hash(record: &CandidateRecord, seed: u64) -> String {
    let body = serde_json::to_vec(record).unwrap_or_else(|_| format!("{record:?}").into_bytes());
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(&body);
    hasher.finalize().to_hex().to_string()
}

/// Result of one dedup pass, before the anomaly check.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub pool_size: usize,
    pub records: Vec<CandidateRecord>,
    /// Dropped as fingerprint or image duplicates.
    pub duplicates: usize,
    /// Dropped by the identity-field filter.
    pub sparse: usize,
}

impl DedupOutcome {
    /// Reject the empty-result anomaly: a non-empty pool that dedup reduced
    /// to nothing.
    pub fn verify(self) -> ExtractResult<Vec<CandidateRecord>> {
        if self.pool_size > 0 && self.records.is_empty() {
            error!(
                pool = self.pool_size,
                duplicates = self.duplicates,
                sparse = self.sparse,
                "every candidate was filtered out during dedup"
            );
            return Err(ExtractError::AllCandidatesFiltered {
                pool_size: self.pool_size,
            });
        }
        Ok(self.records)
    }
}

#[derive(Debug, Clone)]
pub struct Deduplicator {
    seed: u64,
    min_identity_fields: usize,
}

impl Deduplicator {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            seed: config.fallback_seed,
            min_identity_fields: config.min_identity_fields,
        }
    }

    /// First candidate per fingerprint wins; a later candidate sharing any
    /// image with a kept one is a duplicate regardless of fingerprint.
    pub fn run(&self, pool: Vec<CandidateRecord>) -> DedupOutcome {
        let pool_size = pool.len();
        let mut fingerprints = HashSet::new();
        let mut images: HashSet<String> = HashSet::new();
        let mut kept = Vec::new();
        let mut duplicates = 0;

        for record in pool {
            let fingerprint = Fingerprint::of(&record, self.seed);
            if fingerprints.contains(&fingerprint) {
                debug!(id = %record.external_id, "duplicate fingerprint");
                duplicates += 1;
                continue;
            }
            if record.images.iter().any(|url| images.contains(url)) {
                debug!(id = %record.external_id, "duplicate image");
                duplicates += 1;
                continue;
            }
            fingerprints.insert(fingerprint);
            images.extend(record.images.iter().cloned());
            kept.push(record);
        }

        let before = kept.len();
        if self.min_identity_fields > 0 {
            kept.retain(|r| r.identity_fields() >= self.min_identity_fields);
        }
        let sparse = before - kept.len();

        DedupOutcome {
            pool_size,
            records: kept,
            duplicates,
            sparse,
        }
    }

    pub fn dedupe(&self, pool: &[CandidateRecord]) -> Vec<CandidateRecord> {
        self.run(pool.to_vec()).records
    }
}
