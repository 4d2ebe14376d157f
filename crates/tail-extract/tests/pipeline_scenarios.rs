//! End-to-end extraction scenarios over realistic municipal pages.

use chrono::NaiveDate;

use tail_extract::{
    CandidateBuilder, CandidateInput, CandidateRecord, Document, ExtractError, ExtractorConfig,
    Gender, Pipeline, Strategy, StrategyError,
};

// ─────────────────────── helpers ───────────────────────

const URL: &str = "https://www.city.example.jp/pet/cats.html";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, 10).unwrap()
}

fn pipeline() -> Pipeline {
    Pipeline::new(ExtractorConfig::builtin())
        .unwrap()
        .with_today(today())
}

fn pipeline_with(overlay: &str) -> Pipeline {
    Pipeline::new(ExtractorConfig::from_toml_str(overlay).unwrap())
        .unwrap()
        .with_today(today())
}

const TABLE_PAGE: &str = r#"
<html><body>
  <h1>譲渡対象の猫</h1>
  <table class="animal-table">
    <tr><th>名前</th><th>性別</th><th>毛色</th><th>年齢</th></tr>
    <tr><td>たま</td><td>メス</td><td>茶白</td><td>2歳</td></tr>
    <tr><td>ミケ</td><td>オス</td><td>三毛</td><td>生後3ヶ月</td></tr>
    <tr><td>ハチ</td><td></td><td>黒</td><td>成猫</td></tr>
  </table>
</body></html>
"#;

// ─────────────────────── scenarios ───────────────────────

#[test]
fn test_header_table_yields_three_listings() {
    let report = pipeline().extract_static(TABLE_PAGE, URL).unwrap();
    assert_eq!(report.records.len(), 3);
    assert_eq!(report.strategy_counts["table"], 3);

    let genders: Vec<_> = report.records.iter().map(|r| r.gender).collect();
    assert_eq!(
        genders,
        vec![Some(Gender::Female), Some(Gender::Male), Some(Gender::Unknown)]
    );
    let ages: Vec<_> = report
        .records
        .iter()
        .map(|r| r.age_estimate.as_deref())
        .collect();
    assert_eq!(ages, vec![Some("2歳"), Some("生後3ヶ月"), Some("成猫")]);
    assert!(report.records.iter().all(|r| r.extraction_method == "table"));
    assert!(report.records.iter().all(|r| r.source_url == URL));
}

#[test]
fn test_section_wrapping_table_adds_no_listing() {
    let page = r#"
<html><body>
  <div class="cat-info">
    <h2>保護猫一覧</h2>
    <table>
      <tr><th>名前</th><th>性別</th><th>毛色</th><th>年齢</th></tr>
      <tr><td>たま</td><td>メス</td><td>茶白</td><td>2歳</td></tr>
      <tr><td>ミケ</td><td>オス</td><td>三毛</td><td>生後3ヶ月</td></tr>
      <tr><td>ハチ</td><td></td><td>黒</td><td>成猫</td></tr>
    </table>
  </div>
</body></html>
"#;
    let report = pipeline().extract_static(page, URL).unwrap();
    assert_eq!(report.records.len(), 3);
    assert_eq!(report.pool_size, 3);
    assert_eq!(report.strategy_counts["card"], 0);
    let names: Vec<_> = report.records.iter().map(|r| r.name.as_deref()).collect();
    assert_eq!(names, vec![Some("たま"), Some("ミケ"), Some("ハチ")]);
}

#[test]
fn test_numbered_listings_sharing_a_paragraph_both_survive() {
    let page = r#"<p><img src="both.jpg">①たま メス 2歳 ②ミケ オス 三毛</p>"#;
    let report = pipeline().extract_static(page, URL).unwrap();
    assert_eq!(report.strategy_counts["list"], 2);
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.duplicates, 0);
    let genders: Vec<_> = report.records.iter().map(|r| r.gender).collect();
    assert_eq!(genders, vec![Some(Gender::Female), Some(Gender::Male)]);
}

#[test]
fn test_no_listings_notice_is_zero_everywhere() {
    let report = pipeline()
        .extract_static("<p>現在、譲渡可能な猫はいません</p>", URL)
        .unwrap();
    assert!(report.records.is_empty());
    assert_eq!(report.strategy_counts.len(), 6);
    assert!(report.strategy_counts.values().all(|c| *c == 0));
}

#[test]
fn test_extraction_is_deterministic() {
    let p = pipeline();
    let first = p.extract_static(TABLE_PAGE, URL).unwrap();
    let second = p.extract_static(TABLE_PAGE, URL).unwrap();
    assert_eq!(first.records, second.records);
    assert_eq!(first.pool_size, second.pool_size);
}

#[test]
fn test_identity_filter_turns_collapse_into_anomaly() {
    let page = "<p>保護猫 メス 2歳</p>";

    let err = pipeline_with("[dedup]\nmin_identity_fields = 3")
        .extract_static(page, URL)
        .unwrap_err();
    assert!(err.is_anomaly());
    assert!(matches!(err, ExtractError::AllCandidatesFiltered { pool_size } if pool_size >= 2));

    let report = pipeline().extract_static(page, URL).unwrap();
    assert_eq!(report.records.len(), 1);
}

#[test]
fn test_card_page_with_labeled_fields() {
    let page = r#"
      <div class="cat-card">
        <h3>こむぎ</h3>
        <img src="/img/komugi.jpg">
        <dl>
          <dt>性別</dt><dd>メス</dd>
          <dt>毛色</dt><dd>キジ白</dd>
          <dt>年齢</dt><dd>推定1歳</dd>
          <dt>健康状態</dt><dd>ワクチン接種済み</dd>
          <dt>収容日</dt><dd>2026年4月1日</dd>
        </dl>
      </div>"#;
    let report = pipeline().extract_static(page, URL).unwrap();
    let card = report
        .records
        .iter()
        .find(|r| r.extraction_method == "card")
        .expect("card record");
    assert_eq!(card.name.as_deref(), Some("こむぎ"));
    assert_eq!(card.color.as_deref(), Some("キジ白"));
    assert_eq!(card.age_estimate.as_deref(), Some("1歳"));
    assert_eq!(card.health_status.as_deref(), Some("ワクチン接種済み"));
    assert_eq!(
        card.protection_date,
        NaiveDate::from_ymd_opt(2026, 4, 1)
    );
    assert_eq!(card.images, vec!["https://www.city.example.jp/img/komugi.jpg"]);
}

#[test]
fn test_invalid_source_url_fails_run() {
    let err = pipeline().extract_static(TABLE_PAGE, "not a url").unwrap_err();
    assert!(matches!(err, ExtractError::InvalidSourceUrl { .. }));
}

// ─────────────────────── plug-in strategies ───────────────────────

/// A bespoke parser for one site that marks listings with `data-neko`.
struct NekoAttributeParser;

impl Strategy for NekoAttributeParser {
    fn name(&self) -> &str {
        "site:neko_attr"
    }

    fn extract(
        &self,
        doc: &Document,
        builder: &CandidateBuilder<'_>,
    ) -> Result<Vec<CandidateRecord>, StrategyError> {
        Ok(doc
            .select("[data-neko]")
            .into_iter()
            .filter_map(|el| {
                let name = el.value().attr("data-neko").map(str::to_string);
                let text = el.text().collect::<Vec<_>>().join(" ");
                builder.build(doc, CandidateInput::new(self.name(), text).name_hint(name))
            })
            .collect())
    }
}

#[test]
fn test_plugged_in_strategy_runs_after_builtins() {
    let p = pipeline().with_strategy(Box::new(NekoAttributeParser));
    assert_eq!(p.strategy_names().last(), Some(&"site:neko_attr"));

    let report = p
        .extract_static(r#"<span data-neko="もも">メス 三毛</span>"#, URL)
        .unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].name.as_deref(), Some("もも"));
    assert_eq!(report.records[0].strategy(), "site");
}
