//! Replays archived documents through the static pipeline and compares
//! counts against what was recorded.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::archive::{SampleArchive, SampleMeta, SampleOutcome};
use crate::error::ArchiveError;
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A success sample now yields fewer records than recorded.
    SuccessRegression,
    /// A zero sample now yields records.
    FalsePositive,
    /// A success sample could not be replayed.
    SuccessError,
    /// A zero sample could not be replayed.
    ZeroError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionFailure {
    pub source_url: String,
    pub blob: String,
    pub kind: FailureKind,
    pub expected: usize,
    /// `None` when the replay itself failed.
    pub actual: Option<usize>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub false_positives: usize,
    pub success_regressions: usize,
    pub failures: Vec<RegressionFailure>,
}

impl RegressionReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    fn push(&mut self, failure: Option<RegressionFailure>) {
        self.total += 1;
        let Some(failure) = failure else {
            self.passed += 1;
            return;
        };
        self.failed += 1;
        match failure.kind {
            FailureKind::FalsePositive => self.false_positives += 1,
            FailureKind::SuccessRegression => self.success_regressions += 1,
            FailureKind::SuccessError | FailureKind::ZeroError => {}
        }
        self.failures.push(failure);
    }
}

/// Read-only over the archive: replays never record or evict samples.
pub struct RegressionHarness<'a> {
    pipeline: &'a Pipeline,
    archive: &'a SampleArchive,
}

impl<'a> RegressionHarness<'a> {
    pub fn new(pipeline: &'a Pipeline, archive: &'a SampleArchive) -> Self {
        Self { pipeline, archive }
    }

    /// Replay every stored sample.
    pub fn run(&self) -> Result<RegressionReport, ArchiveError> {
        self.run_filtered(|_| true)
    }

    /// Replay the samples of one source.
    pub fn run_source(&self, source_url: &str) -> Result<RegressionReport, ArchiveError> {
        self.run_filtered(|url| url == source_url)
    }

    fn run_filtered(&self, keep: impl Fn(&str) -> bool) -> Result<RegressionReport, ArchiveError> {
        let index = self.archive.load_index()?;
        let mut report = RegressionReport::default();

        for (source_url, samples) in index.iter().filter(|(url, _)| keep(url)) {
            for sample in samples {
                report.push(self.replay(source_url, sample));
            }
        }

        info!(
            total = report.total,
            passed = report.passed,
            failed = report.failed,
            false_positives = report.false_positives,
            "regression run complete"
        );
        Ok(report)
    }

    fn replay(&self, source_url: &str, sample: &SampleMeta) -> Option<RegressionFailure> {
        let failure = |kind, actual, message| RegressionFailure {
            source_url: source_url.to_string(),
            blob: sample.blob.clone(),
            kind,
            expected: sample.expected_count,
            actual,
            message,
        };

        let replayed = self
            .archive
            .read_blob(sample)
            .map_err(|e| e.to_string())
            .and_then(|html| {
                self.pipeline
                    .extract_static_on(&html, source_url, sample.recorded_at.date_naive())
                    .map_err(|e| e.to_string())
            });

        let result = match (sample.outcome, replayed) {
            (SampleOutcome::Success, Ok(report)) if report.records.len() >= sample.expected_count => None,
            (SampleOutcome::Success, Ok(report)) => Some(failure(
                FailureKind::SuccessRegression,
                Some(report.records.len()),
                None,
            )),
            (SampleOutcome::Zero, Ok(report)) if report.records.is_empty() => None,
            (SampleOutcome::Zero, Ok(report)) => Some(failure(
                FailureKind::FalsePositive,
                Some(report.records.len()),
                None,
            )),
            (SampleOutcome::Success, Err(e)) => Some(failure(FailureKind::SuccessError, None, Some(e))),
            (SampleOutcome::Zero, Err(e)) => Some(failure(FailureKind::ZeroError, None, Some(e))),
        };

        if let Some(f) = &result {
            error!(
                source = source_url,
                blob = %f.blob,
                kind = ?f.kind,
                expected = f.expected,
                actual = ?f.actual,
                "regression failure"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(kind: FailureKind) -> RegressionFailure {
        RegressionFailure {
            source_url: "https://city.example.jp/cats/".into(),
            blob: "x.html".into(),
            kind,
            expected: 2,
            actual: Some(0),
            message: None,
        }
    }

    #[test]
    fn test_report_tallies() {
        let mut report = RegressionReport::default();
        report.push(None);
        report.push(Some(failure(FailureKind::FalsePositive)));
        report.push(Some(failure(FailureKind::SuccessRegression)));
        report.push(Some(failure(FailureKind::ZeroError)));

        assert_eq!(report.total, 4);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 3);
        assert_eq!(report.false_positives, 1);
        assert_eq!(report.success_regressions, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_failure_kind_wire_names() {
        let json = serde_json::to_string(&FailureKind::SuccessRegression).unwrap();
        assert_eq!(json, "\"success_regression\"");
    }
}
