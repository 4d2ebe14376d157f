//! Error types for extraction, configuration and the sample archive.

/// Errors raised while building or validating an [`crate::ExtractorConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid regex in {field} ({pattern}): {message}")]
    Regex {
        field: String,
        pattern: String,
        message: String,
    },

    #[error("Invalid CSS selector in {field} ({selector}): {message}")]
    Selector {
        field: String,
        selector: String,
        message: String,
    },

    #[error("Invalid value for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Errors raised by a single extraction strategy.
///
/// The executor never propagates these; they are logged and the strategy
/// contributes zero candidates for the run.
#[derive(thiserror::Error, Debug)]
pub enum StrategyError {
    #[error("Malformed document structure: {0}")]
    Structure(String),

    #[error("Strategy panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Errors raised by the on-disk sample archive.
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index error: {0}")]
    Index(#[from] serde_json::Error),

    #[error("Sample blob already exists: {0}")]
    BlobExists(String),

    #[error("Sample blob missing: {0}")]
    BlobMissing(String),
}

/// Run-level errors surfaced to the caller of the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Invalid source URL {url}: {message}")]
    InvalidSourceUrl { url: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Render failed for {url}: {message}")]
    Render { url: String, message: String },

    #[error("Render timed out for {url} after {timeout_ms}ms")]
    RenderTimeout { url: String, timeout_ms: u64 },

    /// The merged pool was non-empty but deduplication kept nothing.
    ///
    /// This is a data-loss signal, not a legitimate "zero listings" outcome;
    /// callers must not upsert or mark listings removed for this run.
    #[error("All {pool_size} candidates were filtered out during deduplication")]
    AllCandidatesFiltered { pool_size: usize },

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}

impl ExtractError {
    /// Whether this error is the empty-result anomaly rather than a fetch,
    /// render or parse failure.
    pub fn is_anomaly(&self) -> bool {
        matches!(self, ExtractError::AllCandidatesFiltered { .. })
    }
}

/// Convenience result type.
pub type ExtractResult<T> = Result<T, ExtractError>;
