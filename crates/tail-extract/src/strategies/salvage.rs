//! Salvage for markup too broken for the structural strategies.
//!
//! html5ever silently repairs stray cells by inventing rows, which can fuse
//! several animals into one row. `broken_html:orphan_cells` therefore reads
//! the raw source rather than the repaired tree. `broken_html:paragraph`
//! ignores markup beyond block boundaries and cuts the page text on the
//! separators editors type by hand.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::Html;

use super::{prefix_chars, Strategy};
use crate::candidate::{CandidateBuilder, CandidateInput};
use crate::dom::{block_text, collapse_whitespace, labeled_fields, Document};
use crate::error::StrategyError;
use crate::types::CandidateRecord;

fn structural_tag() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"(?i)<(/?)(table|tr|td|th)\b[^>]*>").expect("valid regex"))
}

fn img_src() -> &'static Regex {
    static SRC: OnceLock<Regex> = OnceLock::new();
    SRC.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid regex")
    })
}

pub struct BrokenHtmlStrategy;

impl Strategy for BrokenHtmlStrategy {
    fn name(&self) -> &str {
        "broken_html"
    }

    fn extract(
        &self,
        doc: &Document,
        builder: &CandidateBuilder<'_>,
    ) -> Result<Vec<CandidateRecord>, StrategyError> {
        let mut records = orphan_cell_rows(doc, builder);
        records.extend(paragraphs(doc, builder));
        Ok(records)
    }
}

/// Raw inner HTML of one cell that sits outside any `<tr>`.
struct OrphanCell<'r> {
    inner: &'r str,
}

/// Runs of adjacent orphan cells in the raw source. A run ends at any `<tr>`
/// or `</table>`.
fn orphan_runs(raw: &str) -> Vec<Vec<OrphanCell<'_>>> {
    let mut runs = Vec::new();
    let mut current: Vec<OrphanCell<'_>> = Vec::new();
    let mut row_depth = 0usize;
    let mut open_cell: Option<usize> = None;

    for caps in structural_tag().captures_iter(raw) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let closing = caps.get(1).map_or(false, |m| !m.as_str().is_empty());
        let tag = caps
            .get(2)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_default();

        // Any structural tag ends the cell currently being read.
        if let Some(start) = open_cell.take() {
            current.push(OrphanCell {
                inner: &raw[start..whole.start()],
            });
        }

        match (tag.as_str(), closing) {
            ("tr", false) => {
                row_depth += 1;
                flush(&mut runs, &mut current);
            }
            ("tr", true) => row_depth = row_depth.saturating_sub(1),
            ("table", _) => {
                row_depth = 0;
                flush(&mut runs, &mut current);
            }
            ("td" | "th", false) if row_depth == 0 => open_cell = Some(whole.end()),
            _ => {}
        }
    }
    if let Some(start) = open_cell {
        current.push(OrphanCell {
            inner: &raw[start..],
        });
    }
    flush(&mut runs, &mut current);
    runs
}

fn flush<'r>(runs: &mut Vec<Vec<OrphanCell<'r>>>, current: &mut Vec<OrphanCell<'r>>) {
    if !current.is_empty() {
        runs.push(std::mem::take(current));
    }
}

fn cell_text(inner: &str) -> String {
    let fragment = Html::parse_fragment(inner);
    collapse_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

fn orphan_cell_rows(doc: &Document, builder: &CandidateBuilder<'_>) -> Vec<CandidateRecord> {
    let config = builder.config();
    let width = config.limits.implicit_row_cells;
    let mut records = Vec::new();

    for run in orphan_runs(doc.raw()) {
        for row in run.chunks(width) {
            if row.len() < config.limits.min_implicit_row_cells {
                continue;
            }
            let texts: Vec<String> = row.iter().map(|c| cell_text(c.inner)).collect();
            if texts.iter().all(|t| t.is_empty()) {
                continue;
            }
            let name_hint = texts
                .first()
                .filter(|t| !t.is_empty() && !config.keywords.has_core(t))
                .cloned();
            let mut images: Vec<String> = Vec::new();
            for cell in row {
                for caps in img_src().captures_iter(cell.inner) {
                    if let Some(url) = caps.get(1).and_then(|m| doc.resolve_url(m.as_str())) {
                        if !images.contains(&url) {
                            images.push(url);
                        }
                    }
                }
            }
            let input = CandidateInput::new("broken_html:orphan_cells", texts.join(" "))
                .name_hint(name_hint)
                .images(images)
                .speculative(true);
            records.extend(builder.build(doc, input));
        }
    }
    records
}

/// Page text cut at block boundaries and hand-typed separators into
/// synthetic paragraphs.
fn paragraphs(doc: &Document, builder: &CandidateBuilder<'_>) -> Vec<CandidateRecord> {
    let config = builder.config();
    let limits = &config.limits;
    let mut text = block_text(doc.body()).join("\n");
    for separator in &config.keywords.separators {
        if !separator.is_empty() {
            text = text.replace(separator.as_str(), "\n");
        }
    }

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    let candidates = text
        .lines()
        .map(str::trim)
        .filter(|p| {
            let len = p.chars().count();
            len >= limits.paragraph_min_chars && len <= limits.paragraph_max_chars
        })
        .filter(|p| config.keywords.has_core(p) && config.keywords.has_listing_signal(p))
        .filter(|p| seen.insert(p.to_string()))
        .take(limits.paragraph_max);

    for paragraph in candidates {
        let lines = vec![paragraph.to_string()];
        let input = CandidateInput::new(
            "broken_html:paragraph",
            prefix_chars(paragraph, limits.paragraph_max_chars),
        )
        .labeled(labeled_fields(&lines, &config.labels))
        .speculative(true);
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
        BrokenHtmlStrategy.extract(&doc, &builder).unwrap()
    }

    #[test]
    fn test_orphan_runs_split_on_rows() {
        let raw = "<table><td>a</td><td>b</td><tr><td>c</td></tr><td>d</td></table>";
        let runs = orphan_runs(raw);
        let texts: Vec<Vec<&str>> = runs
            .iter()
            .map(|run| run.iter().map(|c| c.inner).collect())
            .collect();
        assert_eq!(texts, vec![vec!["a", "b"], vec!["d"]]);
    }

    #[test]
    fn test_orphan_cells_grouped_into_rows() {
        let records = run(
            r#"<table>
                 <td>たま</td><td>メス</td><td>茶白</td><td><img src="t.jpg">2歳</td>
                 <td>ミケ</td><td>オス</td>
               </table>"#,
        );
        let orphans: Vec<_> = records
            .iter()
            .filter(|r| r.extraction_method == "broken_html:orphan_cells")
            .collect();
        assert_eq!(orphans.len(), 2);
        assert_eq!(orphans[0].name.as_deref(), Some("たま"));
        assert_eq!(orphans[0].color.as_deref(), Some("茶白"));
        assert_eq!(orphans[0].images, vec!["https://city.example.jp/cats/t.jpg"]);
        assert_eq!(orphans[1].gender, Some(Gender::Male));
        assert!(orphans.iter().all(|r| r.speculative));
    }

    #[test]
    fn test_well_formed_table_has_no_orphans() {
        assert!(orphan_runs("<table><tr><td>たま</td><td>メス</td></tr></table>").is_empty());
    }

    #[test]
    fn test_paragraph_split_on_separators() {
        let records = run(
            "<div>※保護猫のたまちゃんは茶白のメスで推定2歳です。とても甘えん坊です※保護猫のミケくんはオスの三毛で生後3ヶ月です。</div>",
        );
        let paragraphs: Vec<_> = records
            .iter()
            .filter(|r| r.extraction_method == "broken_html:paragraph")
            .collect();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].color.as_deref(), Some("茶白"));
        assert_eq!(paragraphs[1].age_estimate.as_deref(), Some("生後3ヶ月"));
    }

    #[test]
    fn test_notice_yields_nothing() {
        assert!(run("<p>現在、譲渡可能な猫はいません</p>").is_empty());
    }
}
