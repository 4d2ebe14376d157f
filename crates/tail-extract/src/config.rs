//! Extractor configuration: keyword lists, rule tables, label aliases,
//! selectors and numeric limits.
//!
//! The built-in tables ship inside the binary (`default_tables.toml`). A user
//! file is deep-merged over them, so an operator can replace one rule table or
//! one limit without restating the rest.

use std::path::Path;

use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Field;

const BUILTIN_TABLES: &str = include_str!("default_tables.toml");

/// Complete configuration for one [`crate::Pipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub keywords: KeywordConfig,
    pub rules: RuleTables,
    pub labels: LabelConfig,
    pub selectors: SelectorConfig,
    pub limits: LimitConfig,
    pub escalation: EscalationConfig,
    pub dedup: DedupConfig,
    pub archive: ArchiveConfig,
}

/// Keyword families used for gating and signal detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordConfig {
    /// Species words; a table, card or text node must contain one to qualify.
    pub core: Vec<String>,
    pub age: Vec<String>,
    pub gender: Vec<String>,
    pub color: Vec<String>,
    pub status: Vec<String>,
    /// Paragraph separators for broken-HTML salvage.
    pub separators: Vec<String>,
}

impl KeywordConfig {
    pub fn has_core(&self, text: &str) -> bool {
        contains_any(text, &self.core)
    }

    /// Whether `text` carries any age, gender, color or status keyword.
    pub fn has_listing_signal(&self, text: &str) -> bool {
        contains_any(text, &self.age)
            || contains_any(text, &self.gender)
            || contains_any(text, &self.color)
            || contains_any(text, &self.status)
    }
}

pub(crate) fn contains_any(text: &str, words: &[String]) -> bool {
    words.iter().any(|w| text.contains(w.as_str()))
}

/// Label aliases per field, matched against `key: value` keys, `<dt>` terms
/// and table headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    pub name: Vec<String>,
    pub breed: Vec<String>,
    pub age: Vec<String>,
    pub gender: Vec<String>,
    pub color: Vec<String>,
    pub size: Vec<String>,
    pub health: Vec<String>,
    pub personality: Vec<String>,
    pub special_needs: Vec<String>,
    pub deadline: Vec<String>,
    pub protection: Vec<String>,
    pub status: Vec<String>,
}

impl LabelConfig {
    pub fn aliases(&self, field: Field) -> &[String] {
        match field {
            Field::Name => &self.name,
            Field::Breed => &self.breed,
            Field::Age => &self.age,
            Field::Gender => &self.gender,
            Field::Color => &self.color,
            Field::Size => &self.size,
            Field::Health => &self.health,
            Field::Personality => &self.personality,
            Field::SpecialNeeds => &self.special_needs,
            Field::Deadline => &self.deadline,
            Field::Protection => &self.protection,
            Field::Status => &self.status,
        }
    }
}

/// One ordered (pattern, canonical value, precedence) rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub pattern: String,
    pub value: String,
    #[serde(default)]
    pub precedence: i32,
}

/// Which capture groups a date rule yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateShape {
    /// Groups: year, month, day.
    Ymd,
    /// Groups: 令和 year (digits or 元), month, day.
    EraYmd,
    /// Groups: month, day. The year is the extraction year.
    Md,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRule {
    pub pattern: String,
    pub shape: DateShape,
    #[serde(default)]
    pub precedence: i32,
}

/// Rule tables per field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTables {
    pub gender: Vec<FieldRule>,
    pub age: Vec<FieldRule>,
    pub color: Vec<FieldRule>,
    pub breed: Vec<FieldRule>,
    pub size: Vec<FieldRule>,
    pub status: Vec<FieldRule>,
    pub name: Vec<FieldRule>,
    pub deadline: Vec<DateRule>,
    pub protection: Vec<DateRule>,
    /// chrono formats tried by the lenient deadline fallback.
    pub fuzzy_date_formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub tables: Vec<String>,
    pub cards: Vec<String>,
    pub lists: Vec<String>,
    pub aggressive_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Evidence fields (name, known gender, age, color) a candidate needs.
    pub min_evidence: usize,
    pub max_images: usize,
    pub max_name_chars: usize,
    pub free_text_max: usize,
    pub aggressive_max: usize,
    pub fullwidth_max: usize,
    pub paragraph_max: usize,
    pub paragraph_min_chars: usize,
    pub paragraph_max_chars: usize,
    pub numbered_snippet_chars: usize,
    pub implicit_row_cells: usize,
    pub min_implicit_row_cells: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub enabled: bool,
    /// External script count strictly above which the page counts as
    /// script-heavy.
    pub script_threshold: usize,
    pub ajax_markers: Vec<String>,
    pub data_endpoint_patterns: Vec<String>,
    pub container_words: Vec<String>,
    pub render_timeout_ms: u64,
    pub network_idle_ms: u64,
    pub idle_timeout_ms: u64,
    pub settle_ms: u64,
    pub scroll_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Seed for the whole-record content hash.
    pub fallback_seed: u64,
    /// Surviving records with fewer identity fields are dropped after dedup.
    pub min_identity_fields: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub max_success: usize,
    pub max_zero: usize,
    pub max_age_days: i64,
}

/// Upper bound for `archive.max_age_days` (a century).
pub const MAX_ARCHIVE_AGE_DAYS: i64 = 36_500;

impl ArchiveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_success == 0 {
            return Err(invalid("archive.max_success", "must be greater than 0"));
        }
        if !(1..=MAX_ARCHIVE_AGE_DAYS).contains(&self.max_age_days) {
            return Err(invalid(
                "archive.max_age_days",
                &format!("must be between 1 and {MAX_ARCHIVE_AGE_DAYS}"),
            ));
        }
        Ok(())
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ExtractorConfig {
    /// The embedded tables.
    pub fn builtin() -> Self {
        toml::from_str(BUILTIN_TABLES).expect("built-in tables are valid TOML")
    }

    /// Deep-merge a TOML overlay over the built-in tables (for tests and
    /// inline overrides).
    pub fn from_toml_str(overlay: &str) -> Result<Self, ConfigError> {
        Self::from_overlay(overlay, "<string>")
    }

    /// Load a user config file and deep-merge it over the built-in tables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_overlay(&content, &path.display().to_string())
    }

    fn from_overlay(overlay: &str, origin: &str) -> Result<Self, ConfigError> {
        let parse_err = |path: &str, e: &dyn std::fmt::Display| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        };

        let mut base: toml::Table =
            toml::from_str(BUILTIN_TABLES).map_err(|e| parse_err("<builtin>", &e))?;
        let overlay: toml::Table = toml::from_str(overlay).map_err(|e| parse_err(origin, &e))?;
        merge_tables(&mut base, overlay);

        let config: ExtractorConfig = toml::Value::Table(base)
            .try_into()
            .map_err(|e| parse_err(origin, &e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every pattern and selector compiles and the limits are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let field_tables = [
            ("rules.gender", &self.rules.gender),
            ("rules.age", &self.rules.age),
            ("rules.color", &self.rules.color),
            ("rules.breed", &self.rules.breed),
            ("rules.size", &self.rules.size),
            ("rules.status", &self.rules.status),
            ("rules.name", &self.rules.name),
        ];
        for (field, rules) in field_tables {
            for rule in rules {
                check_regex(field, &rule.pattern)?;
            }
        }
        for (field, rules) in [
            ("rules.deadline", &self.rules.deadline),
            ("rules.protection", &self.rules.protection),
        ] {
            for rule in rules {
                check_regex(field, &rule.pattern)?;
            }
        }
        for pattern in &self.escalation.data_endpoint_patterns {
            check_regex("escalation.data_endpoint_patterns", pattern)?;
        }

        for (field, selectors) in [
            ("selectors.tables", &self.selectors.tables),
            ("selectors.cards", &self.selectors.cards),
            ("selectors.lists", &self.selectors.lists),
            ("selectors.aggressive_tags", &self.selectors.aggressive_tags),
        ] {
            for selector in selectors {
                Selector::parse(selector).map_err(|e| ConfigError::Selector {
                    field: field.to_string(),
                    selector: selector.clone(),
                    message: e.to_string(),
                })?;
            }
        }

        if self.keywords.core.is_empty() {
            return Err(invalid("keywords.core", "must name at least one keyword"));
        }
        if self.limits.implicit_row_cells == 0 {
            return Err(invalid("limits.implicit_row_cells", "must be greater than 0"));
        }
        if self.limits.min_implicit_row_cells > self.limits.implicit_row_cells {
            return Err(invalid(
                "limits.min_implicit_row_cells",
                "must not exceed limits.implicit_row_cells",
            ));
        }
        if self.limits.paragraph_min_chars > self.limits.paragraph_max_chars {
            return Err(invalid(
                "limits.paragraph_min_chars",
                "must not exceed limits.paragraph_max_chars",
            ));
        }
        self.archive.validate()?;
        if self.escalation.render_timeout_ms == 0 {
            return Err(invalid("escalation.render_timeout_ms", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn aliases(&self, field: Field) -> &[String] {
        self.labels.aliases(field)
    }
}

fn check_regex(field: &str, pattern: &str) -> Result<(), ConfigError> {
    Regex::new(pattern).map(|_| ()).map_err(|e| ConfigError::Regex {
        field: field.to_string(),
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        message: message.to_string(),
    }
}

/// Tables merge key by key; any other value in `overlay` replaces the base.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
