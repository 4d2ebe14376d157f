//! Field normalizers: free-form listing text to canonical values.
//!
//! Every normalizer is a compiled [`RuleSet`] built from the configured
//! tables. Rules are tried in ascending precedence (ties keep table order);
//! the first rule whose pattern matches wins, so table order is also the
//! tie-break when one text carries several markers.

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::config::{DateRule, DateShape, ExtractorConfig, FieldRule};
use crate::error::ConfigError;
use crate::types::Gender;

/// First year of the 令和 era; era year N is `REIWA_EPOCH + N - 1`.
const REIWA_EPOCH: i32 = 2019;

// ── Width folding ───────────────────────────────────────────────────────────

/// Map full-width ASCII variants (digits, latin, punctuation) to ASCII and
/// no-break spaces to plain spaces. The ideographic space is kept; the card
/// strategy splits on it.
pub fn fold_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            '\u{00A0}' => ' ',
            _ => c,
        })
        .collect()
}

/// Trim label decoration around a name and reject values that cannot be one.
pub fn clean_name(raw: &str, max_chars: usize) -> Option<String> {
    let trimmed = raw.trim_matches(|c: char| {
        c.is_whitespace()
            || matches!(
                c,
                '【' | '】' | '「' | '」' | '『' | '』' | '(' | ')' | '[' | ']' | ':' | '・' | '*'
            )
    });
    let len = trimmed.chars().count();
    if len == 0 || len > max_chars || trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(trimmed.to_string())
}

// ── Field rules ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CompiledRule {
    regex: Regex,
    template: String,
    precedence: i32,
}

/// Ordered pattern → canonical-value rules for one field.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn compile(field: &str, rules: &[FieldRule]) -> Result<Self, ConfigError> {
        let mut compiled = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| ConfigError::Regex {
                    field: field.to_string(),
                    pattern: rule.pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(CompiledRule {
                    regex,
                    template: rule.value.clone(),
                    precedence: rule.precedence,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        // sort_by_key is stable: equal precedence keeps table order.
        compiled.sort_by_key(|r| r.precedence);
        Ok(Self { rules: compiled })
    }

    /// Canonical value of the first matching rule, with `${n}` expanded.
    pub fn apply(&self, text: &str) -> Option<String> {
        self.rules.iter().find_map(|rule| {
            let caps = rule.regex.captures(text)?;
            let mut out = String::new();
            caps.expand(&rule.template, &mut out);
            let out = out.trim().to_string();
            (!out.is_empty()).then_some(out)
        })
    }

    pub fn canonical_values(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.template.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ── Date rules ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CompiledDateRule {
    regex: Regex,
    shape: DateShape,
    precedence: i32,
}

/// Ordered date patterns for one date field.
///
/// A match that does not form a valid calendar date falls through to the
/// next match, then the next rule.
#[derive(Debug, Clone)]
pub struct DateRuleSet {
    rules: Vec<CompiledDateRule>,
    fuzzy_formats: Vec<String>,
    fuzzy_tokens: Vec<Regex>,
}

const MONTHS: &str = "jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec";

impl DateRuleSet {
    pub fn compile(
        field: &str,
        rules: &[DateRule],
        fuzzy_formats: &[String],
    ) -> Result<Self, ConfigError> {
        let mut compiled = rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| ConfigError::Regex {
                    field: field.to_string(),
                    pattern: rule.pattern.clone(),
                    message: e.to_string(),
                })?;
                Ok(CompiledDateRule {
                    regex,
                    shape: rule.shape,
                    precedence: rule.precedence,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        compiled.sort_by_key(|r| r.precedence);

        let fuzzy_tokens = [
            format!(r"(?i)(?:{MONTHS})[a-z]*\.?\s+[0-9]{{1,2}},?\s+[0-9]{{4}}"),
            format!(r"(?i)[0-9]{{1,2}}\s+(?:{MONTHS})[a-z]*\.?,?\s+[0-9]{{4}}"),
            r"[0-9]{1,4}[-/.][0-9]{1,2}[-/.][0-9]{1,4}".to_string(),
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect();

        Ok(Self {
            rules: compiled,
            fuzzy_formats: fuzzy_formats.to_vec(),
            fuzzy_tokens,
        })
    }

    /// First valid date any rule yields. `today` supplies the year for
    /// month/day shapes.
    pub fn parse(&self, text: &str, today: NaiveDate) -> Option<NaiveDate> {
        self.rules.iter().find_map(|rule| {
            rule.regex
                .captures_iter(text)
                .find_map(|caps| build_date(rule.shape, &caps, today))
        })
    }

    /// [`parse`](Self::parse), then a lenient pass over date-like tokens.
    /// A lenient result is kept only when it lies strictly after `today`.
    pub fn parse_lenient(&self, text: &str, today: NaiveDate) -> Option<NaiveDate> {
        self.parse(text, today)
            .or_else(|| self.fuzzy(text).filter(|date| *date > today))
    }

    fn fuzzy(&self, text: &str) -> Option<NaiveDate> {
        self.fuzzy_tokens.iter().find_map(|token_re| {
            token_re.find_iter(text).find_map(|m| {
                let token = m.as_str().replace('.', " ").replace(" ,", ",");
                let token = token.split_whitespace().collect::<Vec<_>>().join(" ");
                let raw = m.as_str();
                self.fuzzy_formats.iter().find_map(|fmt| {
                    NaiveDate::parse_from_str(&token, fmt)
                        .or_else(|_| NaiveDate::parse_from_str(raw, fmt))
                        .ok()
                })
            })
        })
    }
}

fn build_date(shape: DateShape, caps: &regex::Captures<'_>, today: NaiveDate) -> Option<NaiveDate> {
    let num = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };
    match shape {
        DateShape::Ymd => {
            let year: i32 = caps.get(1)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)
        }
        DateShape::EraYmd => {
            let era = caps.get(1)?.as_str();
            let era_year: i32 = if era == "元" { 1 } else { era.parse().ok()? };
            if era_year < 1 {
                return None;
            }
            NaiveDate::from_ymd_opt(REIWA_EPOCH + era_year - 1, num(2)?, num(3)?)
        }
        DateShape::Md => NaiveDate::from_ymd_opt(today.year(), num(1)?, num(2)?),
    }
}

// ── Normalizer bundle ───────────────────────────────────────────────────────

/// All compiled normalizers for one configuration.
#[derive(Debug, Clone)]
pub struct Normalizers {
    gender: RuleSet,
    age: RuleSet,
    color: RuleSet,
    breed: RuleSet,
    size: RuleSet,
    status: RuleSet,
    name: RuleSet,
    deadline: DateRuleSet,
    protection: DateRuleSet,
}

impl Normalizers {
    pub fn from_config(config: &ExtractorConfig) -> Result<Self, ConfigError> {
        let rules = &config.rules;
        let gender = RuleSet::compile("rules.gender", &rules.gender)?;
        if let Some(bad) = gender
            .canonical_values()
            .find(|v| Gender::from_canonical(v).is_none())
        {
            return Err(ConfigError::Validation {
                field: "rules.gender".to_string(),
                message: format!("'{bad}' is not one of male, female, unknown"),
            });
        }

        Ok(Self {
            gender,
            age: RuleSet::compile("rules.age", &rules.age)?,
            color: RuleSet::compile("rules.color", &rules.color)?,
            breed: RuleSet::compile("rules.breed", &rules.breed)?,
            size: RuleSet::compile("rules.size", &rules.size)?,
            status: RuleSet::compile("rules.status", &rules.status)?,
            name: RuleSet::compile("rules.name", &rules.name)?,
            deadline: DateRuleSet::compile(
                "rules.deadline",
                &rules.deadline,
                &rules.fuzzy_date_formats,
            )?,
            protection: DateRuleSet::compile("rules.protection", &rules.protection, &[])?,
        })
    }

    /// Always returns a value; no marker means [`Gender::Unknown`].
    pub fn gender(&self, text: &str) -> Gender {
        self.gender
            .apply(text)
            .and_then(|v| Gender::from_canonical(&v))
            .unwrap_or(Gender::Unknown)
    }

    pub fn age(&self, text: &str) -> Option<String> {
        self.age.apply(text)
    }

    pub fn color(&self, text: &str) -> Option<String> {
        self.color.apply(text)
    }

    pub fn breed(&self, text: &str) -> Option<String> {
        self.breed.apply(text)
    }

    pub fn size(&self, text: &str) -> Option<String> {
        self.size.apply(text)
    }

    /// `None` means no adopted/pending marker; callers default to available.
    pub fn status(&self, text: &str) -> Option<String> {
        self.status.apply(text)
    }

    /// Name announced inline (`名前：たま`); labeled names bypass this.
    pub fn name(&self, text: &str) -> Option<String> {
        self.name.apply(text)
    }

    pub fn deadline(&self, text: &str, today: NaiveDate) -> Option<NaiveDate> {
        self.deadline.parse_lenient(text, today)
    }

    /// Any date the strict deadline rules recognize, without the lenient
    /// fallback. Used for values already known to be dates (labeled cells).
    pub fn plain_date(&self, text: &str, today: NaiveDate) -> Option<NaiveDate> {
        self.deadline.parse(text, today)
    }

    /// Strict only; a protection date is never guessed.
    pub fn protection(&self, text: &str, today: NaiveDate) -> Option<NaiveDate> {
        self.protection.parse(text, today)
    }
}
