//! tail-extract: multi-strategy adoption-listing extraction, deduplication and sample-based regression.

pub mod archive;
pub mod candidate;
pub mod config;
pub mod dedup;
pub mod dom;
pub mod error;
pub mod escalation;
pub mod executor;
pub mod normalize;
pub mod pipeline;
pub mod regression;
pub mod renderer;
pub mod strategies;
pub mod types;

pub use archive::{SampleArchive, SampleInput, SampleMeta, SampleOutcome};
pub use candidate::{CandidateBuilder, CandidateInput};
pub use config::ExtractorConfig;
pub use dedup::{DedupOutcome, Deduplicator, Fingerprint};
pub use dom::Document;
pub use error::{ArchiveError, ConfigError, ExtractError, ExtractResult, StrategyError};
pub use escalation::{DynamicSignals, EscalationController, EscalationDecision};
pub use executor::{StrategyExecutor, StrategyPass};
pub use normalize::Normalizers;
pub use pipeline::{ExtractionReport, Pipeline, RunStats};
pub use regression::{FailureKind, RegressionFailure, RegressionHarness, RegressionReport};
pub use renderer::chromium::ChromiumLauncher;
pub use renderer::{RenderContext, Renderer, RendererLauncher};
pub use strategies::Strategy;
pub use types::*;
