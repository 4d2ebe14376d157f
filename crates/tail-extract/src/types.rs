//! Core data types shared by strategies, dedup and the archive.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical gender of a listed animal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    /// Normalization was attempted and found no marker.
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }

    /// Parse the canonical value a gender rule produces.
    pub fn from_canonical(value: &str) -> Option<Self> {
        match value {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "unknown" => Some(Gender::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listing field that a labeled value (`性別：メス`, `<dt>毛色</dt>`, a
/// table header) can be mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Name,
    Breed,
    Age,
    Gender,
    Color,
    Size,
    Health,
    Personality,
    SpecialNeeds,
    Deadline,
    Protection,
    Status,
}

/// One putative listing emitted by a single strategy.
///
/// Records are built once by [`crate::candidate::CandidateBuilder`] and never
/// mutated afterwards; dedup only keeps or drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub external_id: String,
    pub name: Option<String>,
    pub breed: Option<String>,
    pub age_estimate: Option<String>,
    pub gender: Option<Gender>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub health_status: Option<String>,
    pub personality: Option<String>,
    pub special_needs: Option<String>,
    /// Up to three absolute image URLs, document order.
    pub images: Vec<String>,
    pub protection_date: Option<NaiveDate>,
    pub deadline_date: Option<NaiveDate>,
    pub status: String,
    pub source_url: String,
    /// Strategy identity, optionally `strategy:variant`.
    pub extraction_method: String,
    /// Produced by a precision-risky strategy (aggressive, broken-HTML salvage).
    pub speculative: bool,
}

impl CandidateRecord {
    /// Number of populated identity fields among name, color, age and a known
    /// gender.
    pub fn identity_fields(&self) -> usize {
        [
            self.name.is_some(),
            self.color.is_some(),
            self.age_estimate.is_some(),
            matches!(self.gender, Some(Gender::Male | Gender::Female)),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    /// The strategy part of `extraction_method`, without any variant suffix.
    pub fn strategy(&self) -> &str {
        self.extraction_method
            .split(':')
            .next()
            .unwrap_or(&self.extraction_method)
    }
}

/// Output of one strategy over one document.
///
/// Ephemeral: used for per-strategy counts and diagnostics, then merged into
/// the candidate pool.
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub strategy: String,
    pub candidates: Vec<CandidateRecord>,
    /// Set when the strategy failed; `candidates` is then empty.
    pub error: Option<String>,
}
