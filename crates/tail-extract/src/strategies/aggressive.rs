//! Keyword sweep over every small text block. High recall, low precision:
//! records are marked speculative.

use super::Strategy;
use crate::candidate::{CandidateBuilder, CandidateInput};
use crate::dom::{block_text, element_text, is_leaf_block, labeled_fields, Document};
use crate::error::StrategyError;
use crate::types::CandidateRecord;

pub struct AggressiveStrategy;

impl Strategy for AggressiveStrategy {
    fn name(&self) -> &str {
        "aggressive"
    }

    fn extract(
        &self,
        doc: &Document,
        builder: &CandidateBuilder<'_>,
    ) -> Result<Vec<CandidateRecord>, StrategyError> {
        let config = builder.config();
        let selector = config.selectors.aggressive_tags.join(", ");
        if selector.is_empty() {
            return Ok(Vec::new());
        }

        let elements = doc
            .select(&selector)
            .into_iter()
            .filter(|el| is_leaf_block(*el))
            .filter(|el| {
                let text = element_text(*el);
                config.keywords.has_core(&text) && config.keywords.has_listing_signal(&text)
            })
            .take(config.limits.aggressive_max);

        let mut records = Vec::new();
        for el in elements {
            let lines = block_text(el);
            let input = CandidateInput::new(self.name(), lines.join(" "))
                .labeled(labeled_fields(&lines, &config.labels))
                .images(doc.images_within(el, config.limits.max_images))
                .speculative(true);
            records.extend(builder.build(doc, input));
        }
        Ok(records)
    }
}
