//! Table rows as listings.

use scraper::ElementRef;
use tracing::trace;

use super::{select_unique, Strategy};
use crate::candidate::{CandidateBuilder, CandidateInput};
use crate::dom::{element_text, map_label, Document};
use crate::error::StrategyError;
use crate::types::{CandidateRecord, Field};

pub struct TableStrategy;

impl Strategy for TableStrategy {
    fn name(&self) -> &str {
        "table"
    }

    fn extract(
        &self,
        doc: &Document,
        builder: &CandidateBuilder<'_>,
    ) -> Result<Vec<CandidateRecord>, StrategyError> {
        let config = builder.config();
        let mut records = Vec::new();

        for table in select_unique(doc, &config.selectors.tables) {
            if !config.keywords.has_core(&element_text(table)) {
                continue;
            }
            let rows = own_rows(table);
            trace!(rows = rows.len(), "keyword table");

            // A lone row is data; otherwise the first row is the header.
            let (headers, data) = match rows.split_first() {
                Some((first, rest)) if !rest.is_empty() => {
                    let headers: Vec<Option<Field>> = first
                        .iter()
                        .map(|cell| map_label(&element_text(*cell), &config.labels))
                        .collect();
                    (headers, rest)
                }
                _ => (Vec::new(), rows.as_slice()),
            };

            let name_mapped = headers.contains(&Some(Field::Name));
            let first_col_mapped = headers.first().map_or(false, Option::is_some);

            for row in data {
                let texts: Vec<String> = row.iter().map(|cell| element_text(*cell)).collect();
                if texts.iter().all(|t| t.is_empty()) {
                    continue;
                }

                let labeled: Vec<(Field, String)> = texts
                    .iter()
                    .enumerate()
                    .filter(|(_, text)| !text.is_empty())
                    .filter_map(|(i, text)| {
                        headers
                            .get(i)
                            .copied()
                            .flatten()
                            .map(|field| (field, text.clone()))
                    })
                    .collect();

                let name_hint = if name_mapped || first_col_mapped {
                    None
                } else {
                    texts
                        .first()
                        .filter(|t| !t.is_empty() && !config.keywords.has_core(t))
                        .cloned()
                };

                let images = row
                    .iter()
                    .flat_map(|cell| doc.images_within(*cell, config.limits.max_images))
                    .collect();

                let input = CandidateInput::new(self.name(), texts.join(" "))
                    .labeled(labeled)
                    .name_hint(name_hint)
                    .images(images);
                records.extend(builder.build(doc, input));
            }
        }
        Ok(records)
    }
}

/// Cells of every row that belongs to `table` itself. Rows of nested tables
/// are left to the nested table, and rows wrapping a nested table are layout,
/// not data.
fn own_rows(table: ElementRef<'_>) -> Vec<Vec<ElementRef<'_>>> {
    table
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "tr")
        .filter(|tr| {
            tr.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().name() == "table")
                .map(|t| t.id())
                == Some(table.id())
        })
        .map(|tr| {
            tr.children()
                .filter_map(ElementRef::wrap)
                .filter(|c| matches!(c.value().name(), "td" | "th"))
                .collect::<Vec<_>>()
        })
        .filter(|cells| {
            !cells.is_empty()
                && !cells.iter().any(|cell| {
                    cell.descendants()
                        .filter_map(ElementRef::wrap)
                        .any(|d| d.value().name() == "table")
                })
        })
        .collect()
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
        TableStrategy.extract(&doc, &builder).unwrap()
    }

    #[test]
    fn test_header_row_maps_columns() {
        let records = run(
            "<table>
              <tr><th>名前</th><th>性別</th><th>毛色</th><th>年齢</th></tr>
              <tr><td>たま</td><td>メス</td><td>茶白</td><td>2歳</td></tr>
              <tr><td>ミケ</td><td>オス</td><td>三毛</td><td>生後3ヶ月</td></tr>
              <tr><td>ハチ</td><td></td><td>黒</td><td>成猫</td></tr>
            </table>",
        );
        assert_eq!(records.len(), 3);
        let genders: Vec<_> = records.iter().map(|r| r.gender).collect();
        assert_eq!(
            genders,
            vec![Some(Gender::Female), Some(Gender::Male), Some(Gender::Unknown)]
        );
        let ages: Vec<_> = records.iter().map(|r| r.age_estimate.as_deref()).collect();
        assert_eq!(ages, vec![Some("2歳"), Some("生後3ヶ月"), Some("成猫")]);
        assert_eq!(records[0].name.as_deref(), Some("たま"));
        assert!(records.iter().all(|r| r.extraction_method == "table"));
    }

    #[test]
    fn test_table_without_keyword_ignored() {
        let records = run(
            "<table>
              <tr><th>名前</th><th>性別</th></tr>
              <tr><td>ポチ</td><td>オス</td></tr>
            </table>",
        );
        assert!(records.is_empty());
    }

    #[test]
    fn test_single_row_is_data() {
        let records = run("<table><tr><td>たま</td><td>メス 子猫</td></tr></table>");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name.as_deref(), Some("たま"));
        assert_eq!(records[0].age_estimate.as_deref(), Some("子猫"));
    }

    #[test]
    fn test_nested_table_rows_not_double_counted() {
        let records = run(
            r#"<table class="cat-table"><tr><td>
                 <table>
                   <tr><th>名前</th><th>性別</th><th>年齢</th></tr>
                   <tr><td>たま</td><td>メス</td><td>成猫</td></tr>
                 </table>
               </td></tr></table>"#,
        );
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_row_images_resolved() {
        let records = run(
            r#"<table>
              <tr><th>写真</th><th>名前</th><th>性別</th><th>年齢</th></tr>
              <tr><td><img src="img/tama.jpg"></td><td>たま</td><td>メス</td><td>成猫</td></tr>
            </table>"#,
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].images, vec!["https://city.example.jp/cats/img/tama.jpg"]);
    }
}
