//! Candidate extractors.
//!
//! Each strategy is an independent heuristic over the same parsed document.
//! None of them sees another's output; the executor runs them all and merges
//! the results, and dedup sorts out the overlap.

pub mod aggressive;
pub mod card;
pub mod free_text;
pub mod list;
pub mod salvage;
pub mod table;

use std::collections::HashSet;

use scraper::ElementRef;

use crate::candidate::CandidateBuilder;
use crate::dom::Document;
use crate::error::StrategyError;
use crate::types::CandidateRecord;

pub use aggressive::AggressiveStrategy;
pub use card::CardStrategy;
pub use free_text::FreeTextStrategy;
pub use list::ListStrategy;
pub use salvage::BrokenHtmlStrategy;
pub use table::TableStrategy;

/// One extraction heuristic.
///
/// Implementations must be pure with respect to the document: same document,
/// same builder configuration, same output in the same order.
pub trait Strategy: Send + Sync {
    /// Provenance prefix written into `extraction_method`.
    fn name(&self) -> &str;

    fn extract(
        &self,
        doc: &Document,
        builder: &CandidateBuilder<'_>,
    ) -> Result<Vec<CandidateRecord>, StrategyError>;
}

/// The built-in strategies in execution order.
pub fn default_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(TableStrategy),
        Box::new(CardStrategy),
        Box::new(ListStrategy),
        Box::new(FreeTextStrategy),
        Box::new(AggressiveStrategy),
        Box::new(BrokenHtmlStrategy),
    ]
}

/// Elements matching any of `selectors`, each element once, in selector
/// then document order.
pub(crate) fn select_unique<'d>(doc: &'d Document, selectors: &[String]) -> Vec<ElementRef<'d>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for selector in selectors {
        for el in doc.select(selector) {
            if seen.insert(el.id()) {
                out.push(el);
            }
        }
    }
    out
}

/// Drop every element that contains another element of the set.
pub(crate) fn innermost<'d>(elements: Vec<ElementRef<'d>>) -> Vec<ElementRef<'d>> {
    let ids: HashSet<_> = elements.iter().map(|el| el.id()).collect();
    elements
        .iter()
        .filter(|el| !el.descendants().skip(1).any(|d| ids.contains(&d.id())))
        .copied()
        .collect()
}

/// First `max` characters of `text`.
pub(crate) fn prefix_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn doc(html: &str) -> Document {
        Document::parse(
            html,
            "https://city.example.jp/cats",
            NaiveDate::from_ymd_opt(2026, 5, 10).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_strategy_names_unique() {
        let strategies = default_strategies();
        let names: HashSet<&str> = strategies.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), strategies.len());
        assert_eq!(strategies[0].name(), "table");
    }

    #[test]
    fn test_select_unique_dedupes_across_selectors() {
        let d = doc(r#"<div class="card cat-card">a</div><div class="card">b</div>"#);
        let found = select_unique(&d, &[".cat-card".to_string(), ".card".to_string()]);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_innermost_drops_wrappers() {
        let d = doc(r#"<div class="card" id="outer"><div class="card" id="inner">x</div></div>"#);
        let found = innermost(select_unique(&d, &[".card".to_string()]));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value().attr("id"), Some("inner"));
    }

    #[test]
    fn test_prefix_chars_multibyte() {
        assert_eq!(prefix_chars("たまメス2歳", 3), "たまメ");
        assert_eq!(prefix_chars("ab", 5), "ab");
    }
}
