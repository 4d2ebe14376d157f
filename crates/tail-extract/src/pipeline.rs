//! Document to final record set: strategies, escalation, dedup.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::candidate::CandidateBuilder;
use crate::config::ExtractorConfig;
use crate::dedup::Deduplicator;
use crate::dom::Document;
use crate::error::ExtractResult;
use crate::escalation::{DynamicSignals, EscalationController, EscalationDecision};
use crate::executor::{StrategyExecutor, StrategyPass};
use crate::normalize::Normalizers;
use crate::renderer::RendererLauncher;
use crate::strategies::Strategy;
use crate::types::CandidateRecord;

/// Everything one run produced. `records` is what the caller upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub source_url: String,
    pub records: Vec<CandidateRecord>,
    /// Merged pool size before dedup.
    pub pool_size: usize,
    pub strategy_counts: BTreeMap<String, usize>,
    pub strategy_failures: BTreeMap<String, String>,
    /// Signals of the static document.
    pub signals: DynamicSignals,
    pub escalation: EscalationDecision,
    /// The document the records came from: the rendered DOM when the run
    /// escalated, the input otherwise.
    pub document: String,
    pub duplicates: usize,
    pub sparse: usize,
}

impl ExtractionReport {
    pub fn escalated(&self) -> bool {
        self.escalation.escalates()
    }
}

/// Aggregate counters for the health collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub documents: usize,
    pub candidates: usize,
    pub escalations: usize,
    pub failures: usize,
    pub anomalies: usize,
}

impl RunStats {
    pub fn record(&mut self, result: &ExtractResult<ExtractionReport>) {
        self.documents += 1;
        match result {
            Ok(report) => {
                self.candidates += report.records.len();
                if report.escalated() {
                    self.escalations += 1;
                }
            }
            Err(e) if e.is_anomaly() => self.anomalies += 1,
            Err(_) => self.failures += 1,
        }
    }
}

/// One configured extraction engine. Holds no per-document state, so a
/// single instance serves any number of runs.
pub struct Pipeline {
    config: ExtractorConfig,
    normalizers: Normalizers,
    executor: StrategyExecutor,
    dedup: Deduplicator,
    escalation: EscalationController,
    today: Option<NaiveDate>,
}

impl Pipeline {
    pub fn new(config: ExtractorConfig) -> ExtractResult<Self> {
        config.validate()?;
        let normalizers = Normalizers::from_config(&config)?;
        Ok(Self {
            dedup: Deduplicator::new(&config.dedup),
            escalation: EscalationController::new(config.escalation.clone()),
            executor: StrategyExecutor::default(),
            normalizers,
            config,
            today: None,
        })
    }

    /// Append a source-specific strategy after the built-in ones.
    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.executor = self.executor.with_strategy(strategy);
        self
    }

    /// Pin the extraction date (relative dates and the future-deadline check
    /// are computed against it).
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.executor.strategy_names()
    }

    /// Executor and dedup only, never a browser.
    pub fn extract_static(&self, html: &str, source_url: &str) -> ExtractResult<ExtractionReport> {
        self.extract_static_on(html, source_url, self.today())
    }

    /// [`Pipeline::extract_static`] as of a given date.
    pub fn extract_static_on(
        &self,
        html: &str,
        source_url: &str,
        today: NaiveDate,
    ) -> ExtractResult<ExtractionReport> {
        let (pass, signals) = self.static_pass(html, source_url, today)?;
        let decision = EscalationDecision::decide(
            &self.config.escalation,
            &signals,
            pass.pool.len(),
            false,
        );
        self.finish(source_url, pass, signals, decision, html.to_string())
    }

    /// Full run. `launcher` is the renderer used when the page looks
    /// script-driven and the static pass found nothing.
    pub async fn run(
        &self,
        html: &str,
        source_url: &str,
        launcher: Option<&dyn RendererLauncher>,
    ) -> ExtractResult<ExtractionReport> {
        let today = self.today();
        let (pass, signals) = self.static_pass(html, source_url, today)?;
        let decision = EscalationDecision::decide(
            &self.config.escalation,
            &signals,
            pass.pool.len(),
            launcher.is_some(),
        );

        let (pass, document) = match launcher {
            Some(launcher) if decision.escalates() => {
                info!(url = source_url, signals = ?signals.fired(), "static pass empty");
                let rendered = self.escalation.render(launcher, source_url).await?;
                let (pass, _) = self.static_pass(&rendered, source_url, today)?;
                (pass, rendered)
            }
            _ => (pass, html.to_string()),
        };

        self.finish(source_url, pass, signals, decision, document)
    }

    // `Document` is !Send, so it lives and dies inside this sync call.
    fn static_pass(
        &self,
        html: &str,
        source_url: &str,
        today: NaiveDate,
    ) -> ExtractResult<(StrategyPass, DynamicSignals)> {
        let doc = Document::parse(html, source_url, today)?;
        let builder = CandidateBuilder::new(&self.config, &self.normalizers);
        let pass = self.executor.run(&doc, &builder);
        let signals = DynamicSignals::detect(&doc, &self.config.escalation);
        Ok((pass, signals))
    }

    fn finish(
        &self,
        source_url: &str,
        pass: StrategyPass,
        signals: DynamicSignals,
        escalation: EscalationDecision,
        document: String,
    ) -> ExtractResult<ExtractionReport> {
        let StrategyPass {
            pool,
            counts,
            failures,
        } = pass;
        let pool_size = pool.len();

        let outcome = self.dedup.run(pool);
        let (duplicates, sparse) = (outcome.duplicates, outcome.sparse);
        let records = outcome.verify()?;

        info!(
            url = source_url,
            pool = pool_size,
            records = records.len(),
            escalation = ?escalation,
            "extraction complete"
        );

        Ok(ExtractionReport {
            source_url: source_url.to_string(),
            records,
            pool_size,
            strategy_counts: counts,
            strategy_failures: failures,
            signals,
            escalation,
            document,
            duplicates,
            sparse,
        })
    }
}
