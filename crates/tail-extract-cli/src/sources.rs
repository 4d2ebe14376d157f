//! Source lists: a TOML file of `[[sources]]` tables, or bare URLs from the
//! command line.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum SourceFileError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid sources file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid source URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Duplicate source id: {0}")]
    DuplicateId(String),
}

/// One shelter or municipal page to extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub url: String,
    /// Skip the browser render for this source.
    #[serde(default)]
    pub no_render: bool,
}

impl Source {
    /// Source for a bare URL, its id derived from the host.
    pub fn from_url(url: &str) -> Result<Self, SourceFileError> {
        let parsed = parse_url(url)?;
        let id = parsed
            .host_str()
            .map(|h| h.trim_start_matches("www.").replace('.', "_"))
            .unwrap_or_else(|| "source".to_string());
        Ok(Self {
            id,
            url: url.to_string(),
            no_render: false,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SourceFile {
    #[serde(default)]
    sources: Vec<Source>,
}

/// Parse a sources file body.
pub fn parse_sources(content: &str) -> Result<Vec<Source>, SourceFileError> {
    let file: SourceFile = toml::from_str(content)?;
    let mut seen = std::collections::HashSet::new();
    for source in &file.sources {
        parse_url(&source.url)?;
        if !seen.insert(source.id.as_str()) {
            return Err(SourceFileError::DuplicateId(source.id.clone()));
        }
    }
    Ok(file.sources)
}

pub fn load_sources(path: &Path) -> Result<Vec<Source>, SourceFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| SourceFileError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_sources(&content)
}

fn parse_url(url: &str) -> Result<Url, SourceFileError> {
    let parsed = Url::parse(url).map_err(|e| SourceFileError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(SourceFileError::InvalidUrl {
            url: url.to_string(),
            message: format!("unsupported scheme {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        let sources = parse_sources(
            r#"
[[sources]]
id = "kanagawa"
url = "https://www.pref.kanagawa.jp/osirase/cats.html"

[[sources]]
id = "spa-shelter"
url = "https://shelter.example.org/"
no_render = true
"#,
        )
        .unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "kanagawa");
        assert!(!sources[0].no_render);
        assert!(sources[1].no_render);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = parse_sources(
            "[[sources]]\nid = \"a\"\nurl = \"https://a.example.jp/\"\n\n[[sources]]\nid = \"a\"\nurl = \"https://b.example.jp/\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, SourceFileError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn test_non_http_url_rejected() {
        let err = parse_sources("[[sources]]\nid = \"f\"\nurl = \"file:///etc/passwd\"\n").unwrap_err();
        assert!(matches!(err, SourceFileError::InvalidUrl { .. }));
    }

    #[test]
    fn test_id_from_host() {
        let source = Source::from_url("https://www.city.example.jp/pet/").unwrap();
        assert_eq!(source.id, "city_example_jp");
        assert!(Source::from_url("not a url").is_err());
    }

    #[test]
    fn test_empty_file() {
        assert!(parse_sources("").unwrap().is_empty());
    }
}
