//! Card-like clusters: styled cards, definition lists and the hand-edited
//! `<br>` / full-width-space blocks that stand in for them on older pages.

use std::collections::HashSet;

use scraper::{ElementRef, Selector};

use super::{innermost, select_unique, Strategy};
use crate::candidate::{CandidateBuilder, CandidateInput};
use crate::config::LabelConfig;
use crate::dom::{
    block_text, element_text, is_leaf_block, labeled_fields, map_label, text_nodes, Document,
};
use crate::error::StrategyError;
use crate::normalize::clean_name;
use crate::types::{CandidateRecord, Field};

const HEADING_SELECTOR: &str = "h1, h2, h3, h4, h5, h6, .name, .cat-name, .animal-name, strong";

/// Mapped `<dt>` pairs a bare definition list needs to count as a card.
const MIN_DL_FIELDS: usize = 2;

pub struct CardStrategy;

impl Strategy for CardStrategy {
    fn name(&self) -> &str {
        "card"
    }

    fn extract(
        &self,
        doc: &Document,
        builder: &CandidateBuilder<'_>,
    ) -> Result<Vec<CandidateRecord>, StrategyError> {
        let config = builder.config();
        let heading = Selector::parse(HEADING_SELECTOR)
            .map_err(|e| StrategyError::Other(format!("heading selector: {e}")))?;
        let mut records = Vec::new();

        // A container around a listings table is a page section, not a card;
        // the table strategy owns its rows.
        let cards: Vec<_> = innermost(select_unique(doc, &config.selectors.cards))
            .into_iter()
            .filter(|card| !wraps_data_table(*card))
            .collect();
        for card in &cards {
            let pairs = definition_pairs(*card, &config.labels);
            if !config.keywords.has_core(&element_text(*card)) && pairs.is_empty() {
                continue;
            }
            let name_hint = card
                .select(&heading)
                .map(element_text)
                .find(|t| !config.keywords.has_core(t))
                .and_then(|t| clean_name(&t, config.limits.max_name_chars));
            records.extend(build_block(doc, builder, *card, "card", pairs, name_hint));
        }

        // Definition lists outside every card are cards of their own.
        let card_ids: HashSet<_> = cards.iter().map(|c| c.id()).collect();
        for dl in doc.select("dl") {
            let inside_card = std::iter::once(dl)
                .chain(dl.ancestors().filter_map(ElementRef::wrap))
                .any(|el| card_ids.contains(&el.id()));
            let wraps_card = dl.descendants().any(|d| card_ids.contains(&d.id()));
            if inside_card || wraps_card {
                continue;
            }
            let pairs = definition_pairs(dl, &config.labels);
            if pairs.len() < MIN_DL_FIELDS {
                continue;
            }
            records.extend(build_block(
                doc,
                builder,
                dl,
                "card:definition_list",
                pairs,
                None,
            ));
        }

        records.extend(br_blocks(doc, builder));
        records.extend(fullwidth_runs(doc, builder));
        Ok(records)
    }
}

fn build_block(
    doc: &Document,
    builder: &CandidateBuilder<'_>,
    el: ElementRef<'_>,
    method: &str,
    mut labeled: Vec<(Field, String)>,
    name_hint: Option<String>,
) -> Option<CandidateRecord> {
    let config = builder.config();
    let lines = block_text(el);
    for (field, value) in labeled_fields(&lines, &config.labels) {
        if !labeled.iter().any(|(f, _)| *f == field) {
            labeled.push((field, value));
        }
    }
    let input = CandidateInput::new(method, lines.join(" "))
        .labeled(labeled)
        .name_hint(name_hint)
        .images(doc.images_within(el, config.limits.max_images));
    builder.build(doc, input)
}

/// Whether `el` holds a `<table>` with at least one row after the first.
fn wraps_data_table(el: ElementRef<'_>) -> bool {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|d| d.value().name() == "table")
        .any(|table| {
            table
                .descendants()
                .filter_map(ElementRef::wrap)
                .filter(|d| d.value().name() == "tr")
                .nth(1)
                .is_some()
        })
}

/// `<dt>`/`<dd>` pairs at or under `el` whose term maps to a field. The first
/// value per field wins.
fn definition_pairs(el: ElementRef<'_>, labels: &LabelConfig) -> Vec<(Field, String)> {
    let mut pairs: Vec<(Field, String)> = Vec::new();
    let terms = std::iter::once(el)
        .chain(el.descendants().skip(1).filter_map(ElementRef::wrap))
        .filter(|e| e.value().name() == "dt");
    for dt in terms {
        let Some(field) = map_label(&element_text(dt), labels) else {
            continue;
        };
        let value = dt
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .next()
            .filter(|sib| sib.value().name() == "dd")
            .map(element_text)
            .filter(|v| !v.is_empty());
        if let Some(value) = value {
            if !pairs.iter().any(|(f, _)| *f == field) {
                pairs.push((field, value));
            }
        }
    }
    pairs
}

/// Leaf `<p>`/`<div>` blocks broken up with `<br>` that mention the species.
fn br_blocks(doc: &Document, builder: &CandidateBuilder<'_>) -> Vec<CandidateRecord> {
    let config = builder.config();
    doc.select("p, div")
        .into_iter()
        .filter(|el| is_leaf_block(*el))
        .filter(|el| {
            el.descendants()
                .filter_map(ElementRef::wrap)
                .any(|d| d.value().name() == "br")
        })
        .filter(|el| config.keywords.has_core(&element_text(*el)))
        .filter_map(|el| build_block(doc, builder, el, "card:br_block", Vec::new(), None))
        .collect()
}

/// Text runs separated with ideographic spaces, the usual residue of pasting
/// a spreadsheet row into a CMS.
fn fullwidth_runs(doc: &Document, builder: &CandidateBuilder<'_>) -> Vec<CandidateRecord> {
    let config = builder.config();
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    let runs = text_nodes(doc.body())
        .into_iter()
        .filter(|(_, text)| text.contains('\u{3000}') && config.keywords.has_core(text))
        .take(config.limits.fullwidth_max);
    for (parent, text) in runs {
        if !seen.insert(parent.id()) {
            continue;
        }
        let images = if matches!(parent.value().name(), "body" | "html") {
            Vec::new()
        } else {
            doc.images_within(parent, config.limits.max_images)
        };
        let labeled = labeled_fields(&[text.clone()], &config.labels);
        let input = CandidateInput::new("card:fullwidth_space", text)
            .labeled(labeled)
            .images(images);
        records.extend(builder.build(doc, input));
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::normalize::Normalizers;
    use crate::types::Gender;
    use chrono::NaiveDate;

    fn run(html: &str) -> Vec<CandidateRecord> {
        let config = ExtractorConfig::builtin();
        let normalizers = Normalizers::from_config(&config).unwrap();
        let builder = CandidateBuilder::new(&config, &normalizers);
        let doc = Document::parse(
            html,
            "https://city.example.jp/cats/",
            NaiveDate::from_ymd_opt(2026, 5, 10).unwrap(),
        )
        .unwrap();
        CardStrategy.extract(&doc, &builder).unwrap()
    }

    #[test]
    fn test_styled_card_with_definition_list() {
        let records = run(
            r#"<div class="cat-card">
                 <h3>たま</h3>
                 <img src="tama.jpg">
                 <dl><dt>性別</dt><dd>メス</dd><dt>年齢</dt><dd>推定2歳</dd></dl>
                 <p>人懐っこい猫です</p>
               </div>"#,
        );
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.extraction_method, "card");
        assert_eq!(r.name.as_deref(), Some("たま"));
        assert_eq!(r.gender, Some(Gender::Female));
        assert_eq!(r.age_estimate.as_deref(), Some("2歳"));
        assert_eq!(r.images, vec!["https://city.example.jp/cats/tama.jpg"]);
    }

    #[test]
    fn test_innermost_cards_only() {
        let records = run(
            r#"<div class="cat-card">
                 <div class="card"><p>猫 たま メス 2歳</p></div>
                 <div class="card"><p>猫 ミケ オス 三毛</p></div>
               </div>"#,
        );
        let cards: Vec<_> = records
            .iter()
            .filter(|r| r.extraction_method == "card")
            .collect();
        assert_eq!(cards.len(), 2);
    }

    #[test]
    fn test_container_around_table_is_not_a_card() {
        let records = run(
            r#"<div class="cat-info">
                 <h2>保護猫一覧</h2>
                 <table>
                   <tr><th>名前</th><th>性別</th><th>毛色</th><th>年齢</th></tr>
                   <tr><td>たま</td><td>メス</td><td>茶白</td><td>2歳</td></tr>
                   <tr><td>ミケ</td><td>オス</td><td>三毛</td><td>生後3ヶ月</td></tr>
                 </table>
               </div>"#,
        );
        assert!(records.iter().all(|r| r.extraction_method != "card"));
    }

    #[test]
    fn test_bare_definition_list() {
        let records = run("<dl><dt>名前</dt><dd>ミケ</dd><dt>性別</dt><dd>オス</dd></dl>");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].extraction_method, "card:definition_list");
        assert_eq!(records[0].name.as_deref(), Some("ミケ"));
    }

    #[test]
    fn test_br_block() {
        let records = run("<p>保護猫情報<br>名前：クロ<br>性別：オス<br>毛色：黒</p>");
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.extraction_method, "card:br_block");
        assert_eq!(r.name.as_deref(), Some("クロ"));
        assert_eq!(r.color.as_deref(), Some("黒"));
    }

    #[test]
    fn test_fullwidth_space_run() {
        let records = run("<p>保護猫\u{3000}たま\u{3000}メス\u{3000}2歳</p>");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].extraction_method, "card:fullwidth_space");
        assert_eq!(records[0].gender, Some(Gender::Female));
    }

    #[test]
    fn test_notice_yields_nothing() {
        assert!(run("<div class=\"cat-info\"><p>現在、譲渡可能な猫はいません</p></div>").is_empty());
    }
}
