//! Batch runs: fetch each source, extract, record a sample, tally stats.

use serde::Serialize;
use tracing::{error, info, warn};

use tail_extract::{
    ExtractionReport, Pipeline, RendererLauncher, RunStats, SampleArchive, SampleInput,
};

use crate::fetch::HttpClient;
use crate::sources::Source;

/// Per-source result of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRun {
    pub source_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ExtractionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The run produced candidates that deduplication threw away.
    pub anomaly: bool,
    /// Blob name of the sample recorded for this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
}

impl SourceRun {
    fn failed(source: &Source, message: String) -> Self {
        Self {
            source_id: source.id.clone(),
            url: source.url.clone(),
            report: None,
            error: Some(message),
            anomaly: false,
            sample: None,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    pub stats: RunStats,
    pub runs: Vec<SourceRun>,
}

impl BatchSummary {
    /// Whether any source failed or hit the empty-result anomaly.
    pub fn has_failures(&self) -> bool {
        self.stats.failures > 0 || self.stats.anomalies > 0
    }
}

/// Drives sources through fetch and extraction.
pub struct Runner<'a> {
    pipeline: &'a Pipeline,
    launcher: Option<&'a dyn RendererLauncher>,
    archive: Option<&'a SampleArchive>,
}

impl<'a> Runner<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        Self {
            pipeline,
            launcher: None,
            archive: None,
        }
    }

    pub fn with_launcher(mut self, launcher: &'a dyn RendererLauncher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Record a sample for every successful run.
    pub fn with_archive(mut self, archive: &'a SampleArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Fetch and extract every source in order, pausing between fetches.
    pub async fn run_all(&self, client: &HttpClient, sources: &[Source]) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for (i, source) in sources.iter().enumerate() {
            if i > 0 {
                client.pause().await;
            }

            let run = match client.fetch_page(&source.url).await {
                Ok(resp) => {
                    self.process_document(source, &resp.final_url, &resp.body, &mut summary.stats)
                        .await
                }
                Err(e) => {
                    error!(source = %source.id, url = %source.url, "fetch failed: {e:#}");
                    summary.stats.documents += 1;
                    summary.stats.failures += 1;
                    SourceRun::failed(source, format!("{e:#}"))
                }
            };
            summary.runs.push(run);
        }

        info!(
            documents = summary.stats.documents,
            candidates = summary.stats.candidates,
            escalations = summary.stats.escalations,
            failures = summary.stats.failures,
            anomalies = summary.stats.anomalies,
            "batch complete"
        );
        summary
    }

    /// Extract one already-fetched document and record its sample.
    ///
    /// `page_url` is where the document was actually served from (after
    /// redirects); relative links resolve against it. Samples stay keyed by
    /// the configured source URL.
    pub async fn process_document(
        &self,
        source: &Source,
        page_url: &str,
        html: &str,
        stats: &mut RunStats,
    ) -> SourceRun {
        let launcher = if source.no_render { None } else { self.launcher };
        let result = self.pipeline.run(html, page_url, launcher).await;
        stats.record(&result);

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                let mut run = SourceRun::failed(source, e.to_string());
                run.anomaly = e.is_anomaly();
                return run;
            }
        };

        let sample = self.archive.and_then(|archive| {
            let input = SampleInput {
                source_url: &source.url,
                source_id: &source.id,
                html: &report.document,
                expected_count: report.records.len(),
                strategy_counts: report.strategy_counts.clone(),
            };
            match archive.record(input) {
                Ok(meta) => Some(meta.blob),
                Err(e) => {
                    warn!(source = %source.id, "sample not recorded: {e}");
                    None
                }
            }
        });

        SourceRun {
            source_id: source.id.clone(),
            url: source.url.clone(),
            report: Some(report),
            error: None,
            anomaly: false,
            sample,
        }
    }
}
