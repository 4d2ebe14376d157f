//! List items, plus prose numbered by hand (`1.`, `①`, `一．`).

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use scraper::ElementRef;

use super::{innermost, prefix_chars, select_unique, Strategy};
use crate::candidate::{CandidateBuilder, CandidateInput};
use crate::dom::{block_text, element_text, labeled_fields, Document};
use crate::error::StrategyError;
use crate::normalize::fold_width;
use crate::types::CandidateRecord;

/// Elements a numbered segment can be mapped back to.
const SEGMENT_HOSTS: &str = "p, div, span, li, td, dd";

/// Marker families. Each family splits the text independently.
fn marker_families() -> &'static [Regex] {
    static FAMILIES: OnceLock<Vec<Regex>> = OnceLock::new();
    FAMILIES.get_or_init(|| {
        [
            r"(?m)(?:^|\s)[0-9]{1,2}[.)]\s*",
            r"[①-⑳]\s*",
            r"[一二三四五六七八九十]\s*[.。]\s*",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

pub struct ListStrategy;

impl Strategy for ListStrategy {
    fn name(&self) -> &str {
        "list"
    }

    fn extract(
        &self,
        doc: &Document,
        builder: &CandidateBuilder<'_>,
    ) -> Result<Vec<CandidateRecord>, StrategyError> {
        let config = builder.config();
        let mut records = Vec::new();

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for list in select_unique(doc, &config.selectors.lists) {
            if !config.keywords.has_core(&element_text(list)) {
                continue;
            }
            let lis = list
                .descendants()
                .filter_map(ElementRef::wrap)
                .filter(|el| el.value().name() == "li");
            for li in lis {
                if seen.insert(li.id()) && config.keywords.has_core(&element_text(li)) {
                    items.push(li);
                }
            }
        }
        for li in innermost(items) {
            let lines = block_text(li);
            let input = CandidateInput::new(self.name(), lines.join(" "))
                .labeled(labeled_fields(&lines, &config.labels))
                .images(doc.images_within(li, config.limits.max_images));
            records.extend(builder.build(doc, input));
        }

        records.extend(numbered_segments(doc, builder));
        Ok(records)
    }
}

/// Split the page text on manual numbering and turn every segment that
/// reads like a listing into a candidate.
fn numbered_segments(doc: &Document, builder: &CandidateBuilder<'_>) -> Vec<CandidateRecord> {
    let config = builder.config();
    let text = fold_width(&block_text(doc.body()).join("\n"));
    let hosts = doc.select(SEGMENT_HOSTS);
    let host_texts: Vec<String> = hosts.iter().map(|el| element_text(*el)).collect();
    let mut records = Vec::new();

    for marker in marker_families() {
        let starts: Vec<usize> = marker.find_iter(&text).map(|m| m.end()).collect();
        // One marker is more often a footnote than a list.
        if starts.len() < 2 {
            continue;
        }
        let ends = marker
            .find_iter(&text)
            .skip(1)
            .map(|m| m.start())
            .chain(std::iter::once(text.len()));

        let mut segments = Vec::new();
        for (start, end) in starts.iter().copied().zip(ends) {
            if start > end {
                continue;
            }
            let segment = prefix_chars(text[start..end].trim(), config.limits.paragraph_max_chars);
            if segment.is_empty()
                || !(config.keywords.has_core(segment) || config.keywords.has_listing_signal(segment))
            {
                continue;
            }

            let lines: Vec<String> = segment.lines().map(str::to_string).collect();
            let snippet = prefix_chars(lines.first().map_or("", |l| l.trim()), config.limits.numbered_snippet_chars);
            let host = smallest_host(&hosts, &host_texts, snippet);
            segments.push((lines, host));
        }

        // A host shared by several segments keeps its images to itself.
        let mut per_host: HashMap<_, usize> = HashMap::new();
        for host in segments.iter().filter_map(|(_, host)| *host) {
            *per_host.entry(host.id()).or_default() += 1;
        }

        for (lines, host) in segments {
            let images = host
                .filter(|el| per_host.get(&el.id()) == Some(&1))
                .map(|el| doc.images_within(el, config.limits.max_images))
                .unwrap_or_default();

            let input = CandidateInput::new("list:numbered", lines.join(" "))
                .labeled(labeled_fields(&lines, &config.labels))
                .images(images);
            records.extend(builder.build(doc, input));
        }
    }
    records
}

/// The element with the shortest text that still contains `snippet`.
fn smallest_host<'d>(
    hosts: &[ElementRef<'d>],
    host_texts: &[String],
    snippet: &str,
) -> Option<ElementRef<'d>> {
    if snippet.is_empty() {
        return None;
    }
    hosts
        .iter()
        .zip(host_texts)
        .filter(|(_, text)| fold_width(text).contains(snippet))
        .min_by_key(|(_, text)| text.chars().count())
        .map(|(el, _)| *el)
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
        ListStrategy.extract(&doc, &builder).unwrap()
    }

    #[test]
    fn test_list_items_with_keyword() {
        let records = run(
            r#"<ul class="cat-list">
                 <li><img src="a.jpg">保護猫 たま メス 2歳</li>
                 <li>保護猫 ミケ オス 三毛</li>
                 <li>お問い合わせはこちら</li>
               </ul>"#,
        );
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.extraction_method == "list"));
        assert_eq!(records[0].images, vec!["https://city.example.jp/cats/a.jpg"]);
        assert_eq!(records[1].gender, Some(Gender::Male));
    }

    #[test]
    fn test_arabic_numbered_paragraphs() {
        let records = run("<div><p>1. たま メス 2歳</p><p>2. ミケ オス 三毛</p></div>");
        let numbered: Vec<_> = records
            .iter()
            .filter(|r| r.extraction_method == "list:numbered")
            .collect();
        assert_eq!(numbered.len(), 2);
        assert_eq!(numbered[0].gender, Some(Gender::Female));
        assert_eq!(numbered[1].color.as_deref(), Some("三毛"));
    }

    #[test]
    fn test_circled_numbers_in_one_paragraph() {
        let records = run(
            r#"<p><img src="both.jpg">①たま メス 2歳 ②ミケ オス 三毛</p>"#,
        );
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.images.is_empty()));
    }

    #[test]
    fn test_single_marker_ignored() {
        assert!(run("<p>1. たま メス 2歳</p>").is_empty());
    }

    #[test]
    fn test_decimal_numbers_are_not_markers() {
        assert!(run("<p>体重2.5kg メス</p><p>体重3.1kg オス</p>").is_empty());
    }
}
