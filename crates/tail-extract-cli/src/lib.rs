//! TailMatch extraction CLI: source lists, fetching, batch runs.

pub mod config;
pub mod fetch;
pub mod robots;
pub mod runner;
pub mod sources;

pub use config::{cleanup_policy, resolve_config_path, resolve_samples_dir, CliConfig, FetchConfig};
pub use fetch::{HttpClient, HttpResponse};
pub use runner::{BatchSummary, Runner, SourceRun};
pub use sources::{load_sources, parse_sources, Source, SourceFileError};
