//! Runs every strategy over one document and merges the output.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::candidate::CandidateBuilder;
use crate::dom::Document;
use crate::error::StrategyError;
use crate::strategies::{default_strategies, Strategy};
use crate::types::{CandidateRecord, StrategyResult};

/// Merged output of one pass over one document.
#[derive(Debug, Clone, Default)]
pub struct StrategyPass {
    /// All candidates, strategy order then emission order.
    pub pool: Vec<CandidateRecord>,
    /// Candidates per strategy name; every strategy has an entry.
    pub counts: BTreeMap<String, usize>,
    /// Error message per failed strategy.
    pub failures: BTreeMap<String, String>,
}

impl StrategyPass {
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    fn merge(results: Vec<StrategyResult>) -> Self {
        let mut pass = StrategyPass::default();
        for result in results {
            pass.counts
                .insert(result.strategy.clone(), result.candidates.len());
            if let Some(error) = result.error {
                pass.failures.insert(result.strategy, error);
            }
            pass.pool.extend(result.candidates);
        }
        pass
    }
}

/// The ordered strategy set. Never fails: a strategy that errors or panics
/// contributes nothing and the others still run.
pub struct StrategyExecutor {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Default for StrategyExecutor {
    fn default() -> Self {
        Self::new(default_strategies())
    }
}

impl StrategyExecutor {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// Append a strategy, e.g. a parser written for one source's layout.
    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// One result per strategy, in order.
    pub fn run_each(&self, doc: &Document, builder: &CandidateBuilder<'_>) -> Vec<StrategyResult> {
        self.strategies
            .iter()
            .map(|strategy| run_isolated(strategy.as_ref(), doc, builder))
            .collect()
    }

    pub fn run(&self, doc: &Document, builder: &CandidateBuilder<'_>) -> StrategyPass {
        let pass = StrategyPass::merge(self.run_each(doc, builder));
        debug!(
            url = %doc.source_url(),
            pool = pass.pool.len(),
            failures = pass.failures.len(),
            "strategy pass complete"
        );
        pass
    }
}

fn run_isolated(
    strategy: &dyn Strategy,
    doc: &Document,
    builder: &CandidateBuilder<'_>,
) -> StrategyResult {
    let name = strategy.name().to_string();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| strategy.extract(doc, builder)))
        .unwrap_or_else(|payload| Err(StrategyError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(candidates) => {
            debug!(strategy = %name, count = candidates.len(), "strategy finished");
            StrategyResult {
                strategy: name,
                candidates,
                error: None,
            }
        }
        Err(e) => {
            warn!(strategy = %name, url = %doc.source_url(), "strategy failed: {}", e);
            StrategyResult {
                strategy: name,
                candidates: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateInput;
    use crate::config::ExtractorConfig;
    use crate::normalize::Normalizers;
    use chrono::NaiveDate;

    struct Failing;

    impl Strategy for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn extract(
            &self,
            _doc: &Document,
            _builder: &CandidateBuilder<'_>,
        ) -> Result<Vec<CandidateRecord>, StrategyError> {
            Err(StrategyError::Structure("no rows".into()))
        }
    }

    struct Panicking;

    impl Strategy for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn extract(
            &self,
            _doc: &Document,
            _builder: &CandidateBuilder<'_>,
        ) -> Result<Vec<CandidateRecord>, StrategyError> {
            panic!("index out of bounds")
        }
    }

    struct Fixed;

    impl Strategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn extract(
            &self,
            doc: &Document,
            builder: &CandidateBuilder<'_>,
        ) -> Result<Vec<CandidateRecord>, StrategyError> {
            Ok(builder
                .build(doc, CandidateInput::new("fixed", "たま メス 2歳"))
                .into_iter()
                .collect())
        }
    }

    fn run(executor: &StrategyExecutor, html: &str) -> StrategyPass {
        let config = ExtractorConfig::builtin();
        let normalizers = Normalizers::from_config(&config).unwrap();
        let builder = CandidateBuilder::new(&config, &normalizers);
        let doc = Document::parse(
            html,
            "https://city.example.jp/cats/",
            NaiveDate::from_ymd_opt(2026, 5, 10).unwrap(),
        )
        .unwrap();
        executor.run(&doc, &builder)
    }

    #[test]
    fn test_failures_do_not_suppress_others() {
        let executor = StrategyExecutor::new(vec![
            Box::new(Failing),
            Box::new(Panicking),
            Box::new(Fixed),
        ]);
        let pass = run(&executor, "<p></p>");
        assert_eq!(pass.pool.len(), 1);
        assert_eq!(pass.counts["failing"], 0);
        assert_eq!(pass.counts["panicking"], 0);
        assert_eq!(pass.counts["fixed"], 1);
        assert!(pass.failures["failing"].contains("no rows"));
        assert!(pass.failures["panicking"].contains("index out of bounds"));
    }

    #[test]
    fn test_with_strategy_appends() {
        let executor = StrategyExecutor::default().with_strategy(Box::new(Fixed));
        let names = executor.strategy_names();
        assert_eq!(names.len(), 7);
        assert_eq!(names.last(), Some(&"fixed"));
    }

    #[test]
    fn test_every_strategy_counted() {
        let pass = run(&StrategyExecutor::default(), "<p>現在、譲渡可能な猫はいません</p>");
        assert!(pass.is_empty());
        assert_eq!(pass.counts.len(), 6);
        assert!(pass.counts.values().all(|c| *c == 0));
        assert!(pass.failures.is_empty());
    }
}
