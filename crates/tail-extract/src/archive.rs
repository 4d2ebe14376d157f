//! On-disk archive of real documents and their outcomes, replayed by the
//! regression harness.
//!
//! Layout: `<root>/index.json` maps source URL to its samples in recording
//! order; every document is a separate blob next to it. Blobs are created
//! once and never rewritten, only evicted.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOutcome {
    /// The run found at least one listing.
    Success,
    /// The run legitimately found none.
    Zero,
}

impl SampleOutcome {
    pub fn for_count(count: usize) -> Self {
        if count > 0 {
            SampleOutcome::Success
        } else {
            SampleOutcome::Zero
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleOutcome::Success => "success",
            SampleOutcome::Zero => "zero",
        }
    }
}

/// Index entry for one stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMeta {
    pub source_id: String,
    pub recorded_at: DateTime<Utc>,
    pub outcome: SampleOutcome,
    pub expected_count: usize,
    /// File name relative to the archive root.
    pub blob: String,
    pub html_bytes: usize,
    /// Per-strategy yield of the recorded run. Diagnostics only.
    #[serde(default)]
    pub strategy_counts: BTreeMap<String, usize>,
}

/// What to store for one successful run.
#[derive(Debug, Clone)]
pub struct SampleInput<'a> {
    pub source_url: &'a str,
    pub source_id: &'a str,
    pub html: &'a str,
    pub expected_count: usize,
    pub strategy_counts: BTreeMap<String, usize>,
}

pub type SampleIndex = BTreeMap<String, Vec<SampleMeta>>;

pub struct SampleArchive {
    root: PathBuf,
    policy: ArchiveConfig,
}

impl SampleArchive {
    /// Open (creating if needed) an archive rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, policy: ArchiveConfig) -> Result<Self, ArchiveError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root, policy })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record(&self, input: SampleInput<'_>) -> Result<SampleMeta, ArchiveError> {
        self.record_at(input, Utc::now())
    }

    /// Store one document, then trim the source to the retention policy.
    pub fn record_at(
        &self,
        input: SampleInput<'_>,
        at: DateTime<Utc>,
    ) -> Result<SampleMeta, ArchiveError> {
        let outcome = SampleOutcome::for_count(input.expected_count);
        let blob = blob_name(input.source_id, input.source_url, outcome, at);
        self.write_blob(&blob, input.html)?;

        let meta = SampleMeta {
            source_id: input.source_id.to_string(),
            recorded_at: at,
            outcome,
            expected_count: input.expected_count,
            blob,
            html_bytes: input.html.len(),
            strategy_counts: input.strategy_counts,
        };

        let indexed = self.load_index().and_then(|mut index| {
            let samples = index.entry(input.source_url.to_string()).or_default();
            samples.push(meta.clone());
            let evicted = trim(samples, &self.policy);
            self.save_index(&index)?;
            Ok(evicted)
        });
        // Unindexed blobs are unreachable by cleanup.
        let evicted = match indexed {
            Ok(evicted) => evicted,
            Err(e) => {
                let _ = fs::remove_file(self.root.join(&meta.blob));
                return Err(e);
            }
        };
        self.remove_blobs(&evicted);

        info!(
            source = input.source_url,
            outcome = outcome.as_str(),
            expected = meta.expected_count,
            evicted = evicted.len(),
            "sample recorded"
        );
        Ok(meta)
    }

    /// Every source and its samples, oldest first.
    pub fn load_index(&self) -> Result<SampleIndex, ArchiveError> {
        match fs::read_to_string(self.index_path()) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SampleIndex::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn samples(&self, source_url: &str) -> Result<Vec<SampleMeta>, ArchiveError> {
        Ok(self.load_index()?.remove(source_url).unwrap_or_default())
    }

    pub fn read_blob(&self, meta: &SampleMeta) -> Result<String, ArchiveError> {
        match fs::read_to_string(self.root.join(&meta.blob)) {
            Ok(html) => Ok(html),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ArchiveError::BlobMissing(meta.blob.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn cleanup(&self) -> Result<usize, ArchiveError> {
        self.cleanup_at(Utc::now())
    }

    /// Age-based eviction: success samples older than `max_age_days` (each
    /// source keeps its newest success), zero samples older than half that.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> Result<usize, ArchiveError> {
        let success_cutoff = now - Duration::days(self.policy.max_age_days);
        let zero_cutoff = now - Duration::days(self.policy.max_age_days / 2);

        let mut index = self.load_index()?;
        let mut evicted = Vec::new();
        for samples in index.values_mut() {
            let newest_success = samples
                .iter()
                .filter(|s| s.outcome == SampleOutcome::Success)
                .map(|s| s.recorded_at)
                .max();
            let (keep, stale): (Vec<_>, Vec<_>) = samples.drain(..).partition(|s| match s.outcome {
                SampleOutcome::Success => {
                    s.recorded_at >= success_cutoff || Some(s.recorded_at) == newest_success
                }
                SampleOutcome::Zero => s.recorded_at >= zero_cutoff,
            });
            *samples = keep;
            evicted.extend(stale);
        }
        index.retain(|_, samples| !samples.is_empty());

        self.save_index(&index)?;
        self.remove_blobs(&evicted);
        info!(removed = evicted.len(), "sample cleanup complete");
        Ok(evicted.len())
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn write_blob(&self, name: &str, html: &str) -> Result<(), ArchiveError> {
        let path = self.root.join(name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ArchiveError::BlobExists(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(html.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn save_index(&self, index: &SampleIndex) -> Result<(), ArchiveError> {
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(index)?)?;
        fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    fn remove_blobs(&self, evicted: &[SampleMeta]) {
        for meta in evicted {
            match fs::remove_file(self.root.join(&meta.blob)) {
                Ok(()) => debug!(blob = %meta.blob, "sample evicted"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(blob = %meta.blob, "failed to remove sample: {}", e),
            }
        }
    }
}

/// Keep the newest `max_success` and `max_zero` samples of one source;
/// return the rest.
fn trim(samples: &mut Vec<SampleMeta>, policy: &ArchiveConfig) -> Vec<SampleMeta> {
    let mut evicted = Vec::new();
    for (outcome, cap) in [
        (SampleOutcome::Success, policy.max_success),
        (SampleOutcome::Zero, policy.max_zero),
    ] {
        let count = samples.iter().filter(|s| s.outcome == outcome).count();
        let mut excess = count.saturating_sub(cap);
        samples.retain(|s| {
            if excess > 0 && s.outcome == outcome {
                excess -= 1;
                evicted.push(s.clone());
                false
            } else {
                true
            }
        });
    }
    evicted
}

fn blob_name(source_id: &str, source_url: &str, outcome: SampleOutcome, at: DateTime<Utc>) -> String {
    let host = url::Url::parse(source_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "{}_{}_{}_{}.html",
        file_safe(source_id),
        file_safe(&host),
        outcome.as_str(),
        at.format("%Y%m%d_%H%M%S_%3f")
    )
}

fn file_safe(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "source".to_string()
    } else {
        cleaned
    }
}
