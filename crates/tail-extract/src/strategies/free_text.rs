//! Elements whose own text mentions the species.

use std::collections::HashSet;

use super::Strategy;
use crate::candidate::{CandidateBuilder, CandidateInput};
use crate::dom::{block_text, labeled_fields, text_nodes, Document};
use crate::error::StrategyError;
use crate::types::CandidateRecord;

pub struct FreeTextStrategy;

impl Strategy for FreeTextStrategy {
    fn name(&self) -> &str {
        "free_text"
    }

    fn extract(
        &self,
        doc: &Document,
        builder: &CandidateBuilder<'_>,
    ) -> Result<Vec<CandidateRecord>, StrategyError> {
        let config = builder.config();
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        let parents = text_nodes(doc.body())
            .into_iter()
            .filter(|(_, text)| config.keywords.has_core(text))
            .map(|(parent, _)| parent)
            .filter(|parent| !matches!(parent.value().name(), "body" | "html"))
            .filter(|parent| seen.insert(parent.id()))
            .take(config.limits.free_text_max);

        for parent in parents {
            let lines = block_text(parent);
            let input = CandidateInput::new(self.name(), lines.join(" "))
                .labeled(labeled_fields(&lines, &config.labels))
                .images(doc.images_within(parent, config.limits.max_images));
            records.extend(builder.build(doc, input));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::normalize::Normalizers;
    use chrono::NaiveDate;

    fn run_with(config: ExtractorConfig, html: &str) -> Vec<CandidateRecord> {
        let normalizers = Normalizers::from_config(&config).unwrap();
        let builder = CandidateBuilder::new(&config, &normalizers);
        let doc = Document::parse(
            html,
            "https://city.example.jp/cats/",
            NaiveDate::from_ymd_opt(2026, 5, 10).unwrap(),
        )
        .unwrap();
        FreeTextStrategy.extract(&doc, &builder).unwrap()
    }

    #[test]
    fn test_one_candidate_per_parent() {
        let records = run_with(
            ExtractorConfig::builtin(),
            "<p>保護猫 たま メス<br>推定2歳の猫です</p><p>保護猫 ミケ オス 三毛</p>",
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].age_estimate.as_deref(), Some("2歳"));
        assert!(records.iter().all(|r| r.extraction_method == "free_text"));
    }

    #[test]
    fn test_parent_cap() {
        let config = ExtractorConfig::from_toml_str("[limits]\nfree_text_max = 1").unwrap();
        let records = run_with(
            config,
            "<p>保護猫 たま メス 2歳</p><p>保護猫 ミケ オス 三毛</p>",
        );
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_script_text_ignored() {
        let records = run_with(
            ExtractorConfig::builtin(),
            "<div><script>var label = '猫 メス 2歳';</script></div>",
        );
        assert!(records.is_empty());
    }
}
