//! Async HTTP client wrapping reqwest.
//!
//! Handles redirects, timeouts, retry on 5xx and backoff on 429, plus the
//! robots.txt check and the pause between sources.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchConfig;
use crate::robots::{parse_robots, RobotsRules};

/// Response from an HTTP GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// HTTP client for source pages.
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
    config: FetchConfig,
    /// robots.txt per origin; `None` when the file could not be read.
    robots: Mutex<HashMap<String, Option<RobotsRules>>>,
}

impl HttpClient {
    pub fn new(config: FetchConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.as_str())
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.as_str())
            .http1_only()
            .build()
            .unwrap_or_default();

        Self {
            client,
            h1_client,
            config,
            robots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch a source page. Fails on robots.txt refusal or a non-2xx status.
    pub async fn fetch_page(&self, url: &str) -> Result<HttpResponse> {
        let parsed = Url::parse(url)?;
        if self.config.respect_robots && !self.robots_allow(&parsed).await {
            bail!("disallowed by robots.txt: {url}");
        }
        let resp = self.get(url).await?;
        if !(200..300).contains(&resp.status) {
            bail!("HTTP {} for {url}", resp.status);
        }
        Ok(resp)
    }

    /// Wait the configured politeness delay.
    pub async fn pause(&self) {
        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }
    }

    async fn robots_allow(&self, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        let mut cache = self.robots.lock().await;
        if !cache.contains_key(&origin) {
            let rules = match self.get(&format!("{origin}/robots.txt")).await {
                Ok(resp) if resp.status == 200 => {
                    Some(parse_robots(&resp.body, &self.config.user_agent))
                }
                Ok(resp) => {
                    debug!(origin = %origin, status = resp.status, "no robots.txt");
                    None
                }
                Err(e) => {
                    warn!(origin = %origin, "robots.txt fetch failed: {e:#}");
                    None
                }
            };
            cache.insert(origin.clone(), rules);
        }
        match cache.get(&origin) {
            Some(Some(rules)) => rules.is_allowed(url.path()),
            _ => true,
        }
    }

    /// Perform a single GET request with retry on 5xx and backoff on 429.
    ///
    /// Falls back to HTTP/1.1 on protocol errors (some CDNs reject HTTP/2).
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        match self.get_inner(&self.client, url).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let err_str = format!("{e}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    self.get_inner(&self.h1_client, url).await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn get_inner(&self, client: &reqwest::Client, url: &str) -> Result<HttpResponse> {
        let mut retries = 0u32;
        let max_retries = self.config.max_retries;

        loop {
            let resp = client
                .get(url)
                .header("Accept-Language", "ja,en-US;q=0.7,en;q=0.3")
                .send()
                .await;

            match resp {
                Ok(r) => {
                    let status = r.status().as_u16();
                    let final_url = r.url().to_string();

                    // Retry on 5xx
                    if status >= 500 && retries < max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    // Backoff on 429
                    if status == 429 && retries < max_retries {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        let delay = Duration::from_secs(retry_after.min(10));
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let body = r.text().await?;

                    return Ok(HttpResponse {
                        url: url.to_string(),
                        final_url,
                        status,
                        body,
                    });
                }
                Err(e) => {
                    if retries < max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}
