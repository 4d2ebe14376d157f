//! Builds one [`CandidateRecord`] from one fragment of a document.
//!
//! Strategies only decide *which* fragments look like listings; turning a
//! fragment's text and labeled values into normalized fields, and rejecting
//! fragments without enough evidence, happens here so every strategy applies
//! the same rules.

use tracing::debug;

use crate::config::ExtractorConfig;
use crate::dom::{is_label_word, Document};
use crate::normalize::{clean_name, fold_width, Normalizers};
use crate::types::{CandidateRecord, Field, Gender};

/// Longest free-text value kept for health, personality and notes.
const MAX_NOTE_CHARS: usize = 200;

/// Raw material for one candidate.
#[derive(Debug, Clone, Default)]
pub struct CandidateInput {
    /// All visible text of the fragment.
    pub text: String,
    /// Values found under recognized labels. These win over values read
    /// from the free text.
    pub labeled: Vec<(Field, String)>,
    /// Name taken from structure (first table cell, card heading).
    pub name_hint: Option<String>,
    pub images: Vec<String>,
    /// `strategy` or `strategy:variant`.
    pub method: String,
    pub speculative: bool,
}

impl CandidateInput {
    pub fn new(method: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn labeled(mut self, labeled: Vec<(Field, String)>) -> Self {
        self.labeled = labeled;
        self
    }

    pub fn name_hint(mut self, name: Option<String>) -> Self {
        self.name_hint = name;
        self
    }

    pub fn images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn speculative(mut self, speculative: bool) -> Self {
        self.speculative = speculative;
        self
    }

    fn label(&self, field: Field) -> Option<&str> {
        self.labeled
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v.as_str())
    }
}

/// Shared by every strategy of one run.
pub struct CandidateBuilder<'a> {
    config: &'a ExtractorConfig,
    normalizers: &'a Normalizers,
}

impl<'a> CandidateBuilder<'a> {
    pub fn new(config: &'a ExtractorConfig, normalizers: &'a Normalizers) -> Self {
        Self {
            config,
            normalizers,
        }
    }

    pub fn config(&self) -> &'a ExtractorConfig {
        self.config
    }

    pub fn normalizers(&self) -> &'a Normalizers {
        self.normalizers
    }

    /// Normalize `input` into a record, or `None` when fewer than
    /// `limits.min_evidence` of {name, known gender, age, color} are present.
    pub fn build(&self, doc: &Document, input: CandidateInput) -> Option<CandidateRecord> {
        let n = self.normalizers;
        let today = doc.today();
        let text = fold_width(&input.text);
        let max_name = self.config.limits.max_name_chars;

        let name = input
            .label(Field::Name)
            .and_then(|v| clean_name(&fold_width(v), max_name))
            .or_else(|| {
                input
                    .name_hint
                    .as_deref()
                    .and_then(|v| clean_name(&fold_width(v), max_name))
            })
            .or_else(|| n.name(&text).and_then(|v| clean_name(&v, max_name)))
            .filter(|v| !is_label_word(v, &self.config.labels));

        let gender = match input.label(Field::Gender) {
            Some(v) => n.gender(&fold_width(v)),
            None => n.gender(&text),
        };

        let age_estimate = match input.label(Field::Age) {
            Some(v) => n.age(&fold_width(v)),
            None => n.age(&text),
        };

        let color = match input.label(Field::Color) {
            Some(v) => n.color(&fold_width(v)).or_else(|| short_value(v, max_name)),
            None => n.color(&text),
        };

        let breed = match input.label(Field::Breed) {
            Some(v) => n.breed(&fold_width(v)).or_else(|| short_value(v, max_name)),
            None => n.breed(&text),
        };

        let size = match input.label(Field::Size) {
            Some(v) => n.size(&fold_width(v)).or_else(|| short_value(v, max_name)),
            None => n.size(&text),
        };

        let deadline_date = input
            .label(Field::Deadline)
            .and_then(|v| n.deadline(&fold_width(v), today))
            .or_else(|| n.deadline(&text, today));

        let protection_date = input
            .label(Field::Protection)
            .and_then(|v| n.plain_date(&fold_width(v), today))
            .or_else(|| n.protection(&text, today));

        let status = input
            .label(Field::Status)
            .and_then(|v| n.status(&fold_width(v)))
            .or_else(|| n.status(&text))
            .unwrap_or_else(|| "available".to_string());

        let evidence = [
            name.is_some(),
            matches!(gender, Gender::Male | Gender::Female),
            age_estimate.is_some(),
            color.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();

        if evidence < self.config.limits.min_evidence {
            debug!(
                method = %input.method,
                evidence,
                "candidate dropped below evidence threshold"
            );
            return None;
        }

        let health_status = input.label(Field::Health).and_then(note);
        let personality = input.label(Field::Personality).and_then(note);
        let special_needs = input.label(Field::SpecialNeeds).and_then(note);

        let mut images = input.images;
        images.truncate(self.config.limits.max_images);

        Some(CandidateRecord {
            external_id: external_id(doc.source_url().as_str(), &input.method, &text),
            name,
            breed,
            age_estimate,
            gender: Some(gender),
            color,
            size,
            health_status,
            personality,
            special_needs,
            images,
            protection_date,
            deadline_date,
            status,
            source_url: doc.source_url().to_string(),
            extraction_method: input.method,
            speculative: input.speculative,
        })
    }
}

/// `<method slug>_<12 hex chars>`, stable for identical input.
fn external_id(source_url: &str, method: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source_url.as_bytes());
    hasher.update(b"\n");
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    let hash = hasher.finalize().to_hex();
    format!("{}_{}", method.replace(':', "_"), &hash.as_str()[..12])
}

fn short_value(raw: &str, max_chars: usize) -> Option<String> {
    let value = raw.trim();
    let len = value.chars().count();
    (len > 0 && len <= max_chars).then(|| value.to_string())
}

fn note(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.chars().take(MAX_NOTE_CHARS).collect())
}
