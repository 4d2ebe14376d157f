//! Configuration loading and resolution.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use tail_extract::config::ArchiveConfig;
use tail_extract::ExtractorConfig;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TAILMATCH_CONFIG";
/// Environment variable naming the sample archive directory.
pub const SAMPLES_ENV: &str = "TAILMATCH_SAMPLES";

const LOCAL_DIR: &str = ".tailmatch";

/// Resolve the config file path. `None` means built-in tables only.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from(LOCAL_DIR).join("config.toml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    dirs::home_dir()
        .map(|home| home.join(LOCAL_DIR).join("config.toml"))
        .filter(|path| path.exists())
}

/// Resolve the sample archive directory.
pub fn resolve_samples_dir(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(SAMPLES_ENV) {
        return PathBuf::from(env_path);
    }

    let cwd_samples = PathBuf::from(LOCAL_DIR).join("samples");
    if cwd_samples.exists() {
        return cwd_samples;
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(LOCAL_DIR)
        .join("samples")
}

/// `[fetch]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    /// Pause between two sources.
    pub delay_ms: u64,
    pub user_agent: String,
    pub respect_robots: bool,
    pub max_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            delay_ms: 4_000,
            user_agent: "Mozilla/5.0 (compatible; TailMatch/1.0; +https://tailmatch.jp/robots)"
                .to_string(),
            respect_robots: true,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSections {
    #[serde(default)]
    fetch: FetchConfig,
}

/// Everything the CLI reads from its config file.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub extractor: ExtractorConfig,
    pub fetch: FetchConfig,
    /// The file the config came from, if any.
    pub source: Option<PathBuf>,
}

impl CliConfig {
    /// Load `path` over the built-in tables, or the built-ins alone.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self {
                extractor: ExtractorConfig::builtin(),
                fetch: FetchConfig::default(),
                source: None,
            });
        };

        let extractor = ExtractorConfig::load(path)
            .with_context(|| format!("loading extractor config {}", path.display()))?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let sections: FileSections =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;

        Ok(Self {
            extractor,
            fetch: sections.fetch,
            source: Some(path.to_path_buf()),
        })
    }
}

/// Retention policy for `samples cleanup`, with an optional `--days` override.
pub fn cleanup_policy(base: &ArchiveConfig, days: Option<i64>) -> Result<ArchiveConfig> {
    let mut policy = base.clone();
    if let Some(days) = days {
        policy.max_age_days = days;
    }
    policy.validate().context("invalid --days")?;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_paths_win() {
        assert_eq!(
            resolve_config_path(Some("/etc/tailmatch.toml")),
            Some(PathBuf::from("/etc/tailmatch.toml"))
        );
        assert_eq!(
            resolve_samples_dir(Some("/var/lib/samples")),
            PathBuf::from("/var/lib/samples")
        );
    }

    #[test]
    fn test_builtin_when_no_file() {
        let config = CliConfig::load(None).unwrap();
        assert_eq!(config.fetch, FetchConfig::default());
        assert_eq!(config.fetch.delay_ms, 4_000);
        assert!(config.source.is_none());
    }

    #[test]
    fn test_fetch_and_extractor_sections_share_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[fetch]\ndelay_ms = 1500\nrespect_robots = false\n\n[limits]\nfree_text_max = 4"
        )
        .unwrap();

        let config = CliConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.fetch.delay_ms, 1500);
        assert!(!config.fetch.respect_robots);
        assert_eq!(config.fetch.timeout_ms, 30_000);
        assert_eq!(config.extractor.limits.free_text_max, 4);
    }

    #[test]
    fn test_cleanup_days_override() {
        let base = ExtractorConfig::builtin().archive;
        assert_eq!(cleanup_policy(&base, None).unwrap().max_age_days, base.max_age_days);
        assert_eq!(cleanup_policy(&base, Some(7)).unwrap().max_age_days, 7);
        assert!(cleanup_policy(&base, Some(0)).is_err());
        assert!(cleanup_policy(&base, Some(-3)).is_err());
        assert!(cleanup_policy(&base, Some(i64::MAX)).is_err());
    }

    #[test]
    fn test_invalid_extractor_section_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[rules.gender]]\npattern = \"(\"\nvalue = \"male\"").unwrap();
        let err = CliConfig::load(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("rules.gender"));
    }
}
