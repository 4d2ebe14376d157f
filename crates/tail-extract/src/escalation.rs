//! Dynamic-content detection and the single-shot browser re-render.
//!
//! A static pass that finds nothing on a page that looks script-driven is
//! the only case that pays for a browser. The render itself is bounded at
//! every step and always releases the context and the engine.

use std::time::{Duration, Instant};

use regex::Regex;
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EscalationConfig;
use crate::dom::{element_text, Document};
use crate::error::{ExtractError, ExtractResult};
use crate::renderer::{RenderContext, Renderer, RendererLauncher};

const RESOURCE_COUNT_JS: &str = "performance.getEntriesByType('resource').length";
const SCROLL_JS: &str = "window.scrollTo(0, document.body ? document.body.scrollHeight : 0); true";
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Heuristic signs that the listing is filled in by scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicSignals {
    /// Number of `<script src>` tags.
    pub external_scripts: usize,
    /// External script count is above the configured threshold.
    pub script_heavy: bool,
    /// An inline script mentions XHR/fetch style loading.
    pub ajax_inline: bool,
    /// An attribute or inline script references a data endpoint.
    pub data_endpoint: bool,
    /// An empty `div` whose class or id names a listing container.
    pub empty_listing_container: bool,
}

impl DynamicSignals {
    pub fn detect(doc: &Document, config: &EscalationConfig) -> Self {
        let endpoints: Vec<Regex> = config
            .data_endpoint_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        let matches_endpoint = |value: &str| endpoints.iter().any(|re| re.is_match(value));

        let external_scripts = doc.select("script[src]").len();

        let inline: Vec<String> = doc
            .select("script:not([src])")
            .into_iter()
            .map(|s| s.text().collect::<String>())
            .collect();
        let ajax_inline = inline.iter().any(|script| {
            let lower = script.to_lowercase();
            config
                .ajax_markers
                .iter()
                .any(|m| lower.contains(&m.to_lowercase()))
        });

        let data_endpoint = inline.iter().any(|s| matches_endpoint(s))
            || doc.select("*").into_iter().any(|el| {
                el.value().attrs().any(|(name, value)| {
                    (matches!(name, "src" | "href") || name.starts_with("data-"))
                        && matches_endpoint(value)
                })
            });

        let empty_listing_container = doc
            .select("div")
            .into_iter()
            .any(|div| is_empty_container(div, &config.container_words));

        Self {
            external_scripts,
            script_heavy: external_scripts > config.script_threshold,
            ajax_inline,
            data_endpoint,
            empty_listing_container,
        }
    }

    pub fn any(&self) -> bool {
        self.script_heavy || self.ajax_inline || self.data_endpoint || self.empty_listing_container
    }

    /// Names of the signals that fired, for logs and reports.
    pub fn fired(&self) -> Vec<&'static str> {
        [
            (self.script_heavy, "script_heavy"),
            (self.ajax_inline, "ajax_inline"),
            (self.data_endpoint, "data_endpoint"),
            (self.empty_listing_container, "empty_listing_container"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

fn is_empty_container(div: ElementRef<'_>, words: &[String]) -> bool {
    let label = [div.value().attr("class"), div.value().attr("id")]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    !label.is_empty()
        && words.iter().any(|w| label.contains(&w.to_lowercase()))
        && element_text(div).is_empty()
        && !div
            .descendants()
            .filter_map(ElementRef::wrap)
            .any(|el| el.value().name() == "img")
}

/// Why a page was or was not re-rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationDecision {
    /// Escalation is switched off in the config.
    Disabled,
    /// The static pass already found candidates.
    StaticSufficient,
    /// No dynamic-content signal fired.
    NoSignals,
    /// Signals fired but no renderer was supplied.
    NoRenderer,
    Escalate,
}

impl EscalationDecision {
    pub fn decide(
        config: &EscalationConfig,
        signals: &DynamicSignals,
        static_count: usize,
        renderer_available: bool,
    ) -> Self {
        if !config.enabled {
            EscalationDecision::Disabled
        } else if static_count > 0 {
            EscalationDecision::StaticSufficient
        } else if !signals.any() {
            EscalationDecision::NoSignals
        } else if !renderer_available {
            EscalationDecision::NoRenderer
        } else {
            EscalationDecision::Escalate
        }
    }

    pub fn escalates(&self) -> bool {
        matches!(self, EscalationDecision::Escalate)
    }
}

/// Drives one browser render of one page.
#[derive(Debug, Clone)]
pub struct EscalationController {
    config: EscalationConfig,
}

impl EscalationController {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Launch, render `url`, serialize the DOM, then tear everything down
    /// whatever happened in between.
    pub async fn render(&self, launcher: &dyn RendererLauncher, url: &str) -> ExtractResult<String> {
        info!(url, engine = launcher.name(), "escalating to browser render");
        let renderer = launcher
            .launch()
            .await
            .map_err(|e| render_error(url, &e))?;

        let result = self.render_with(renderer.as_ref(), url).await;

        if let Err(e) = renderer.shutdown().await {
            warn!(url, "renderer shutdown failed: {e:#}");
        }
        result
    }

    async fn render_with(&self, renderer: &dyn Renderer, url: &str) -> ExtractResult<String> {
        let mut ctx = renderer
            .new_context()
            .await
            .map_err(|e| render_error(url, &e))?;

        let result = self.capture(ctx.as_mut(), url).await;

        if let Err(e) = ctx.close().await {
            warn!(url, "render context close failed: {e:#}");
        }
        result
    }

    async fn capture(&self, ctx: &mut dyn RenderContext, url: &str) -> ExtractResult<String> {
        let timeout_ms = self.config.render_timeout_ms;
        let landed = tokio::time::timeout(Duration::from_millis(timeout_ms), ctx.navigate(url))
            .await
            .map_err(|_| ExtractError::RenderTimeout {
                url: url.to_string(),
                timeout_ms,
            })?
            .map_err(|e| render_error(url, &e))?;
        debug!(url, landed = %landed, "navigated");

        if !self.wait_for_idle(ctx).await {
            debug!(url, "network never went idle; continuing");
        }
        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;

        if let Err(e) = ctx.execute_js(SCROLL_JS).await {
            debug!(url, "scroll failed: {e:#}");
        }
        tokio::time::sleep(Duration::from_millis(self.config.scroll_settle_ms)).await;

        ctx.get_html().await.map_err(|e| render_error(url, &e))
    }

    /// Poll the resource count until it holds steady for `network_idle_ms`,
    /// giving up after `idle_timeout_ms`.
    async fn wait_for_idle(&self, ctx: &dyn RenderContext) -> bool {
        let idle = Duration::from_millis(self.config.network_idle_ms);
        let deadline = Instant::now() + Duration::from_millis(self.config.idle_timeout_ms);
        let mut last = None;
        let mut stable_since = Instant::now();

        while Instant::now() < deadline {
            let count = match ctx.execute_js(RESOURCE_COUNT_JS).await {
                Ok(value) => value.as_u64(),
                Err(_) => return false,
            };
            if count != last {
                last = count;
                stable_since = Instant::now();
            } else if stable_since.elapsed() >= idle {
                return true;
            }
            tokio::time::sleep(IDLE_POLL.min(idle)).await;
        }
        false
    }
}

fn render_error(url: &str, e: &anyhow::Error) -> ExtractError {
    ExtractError::Render {
        url: url.to_string(),
        message: format!("{e:#}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;
    use chrono::NaiveDate;

    fn signals(html: &str) -> DynamicSignals {
        let config = ExtractorConfig::builtin();
        let doc = Document::parse(
            html,
            "https://city.example.jp/cats/",
            NaiveDate::from_ymd_opt(2026, 5, 10).unwrap(),
        )
        .unwrap();
        DynamicSignals::detect(&doc, &config.escalation)
    }

    #[test]
    fn test_static_page_has_no_signals() {
        let s = signals("<p>現在、譲渡可能な猫はいません</p><script src=\"/a.js\"></script>");
        assert!(!s.any());
        assert_eq!(s.external_scripts, 1);
    }

    #[test]
    fn test_script_heavy() {
        let s = signals(
            r#"<script src="/a.js"></script><script src="/b.js"></script><script src="/c.js"></script>"#,
        );
        assert!(s.script_heavy);
        assert_eq!(s.fired(), vec!["script_heavy"]);
    }

    #[test]
    fn test_inline_fetch_and_endpoint() {
        let s = signals("<script>fetch('/api/cats').then(r => r.json())</script>");
        assert!(s.ajax_inline);
        assert!(s.data_endpoint);
    }

    #[test]
    fn test_endpoint_in_data_attribute() {
        let s = signals(r#"<div data-source="/data/cats.json">読み込み中</div>"#);
        assert!(s.data_endpoint);
        assert!(!s.empty_listing_container);
    }

    #[test]
    fn test_empty_listing_container() {
        assert!(signals(r#"<div id="animal-list"></div>"#).empty_listing_container);
        assert!(!signals(r#"<div id="animal-list">猫 たま</div>"#).empty_listing_container);
        assert!(!signals(r#"<div class="footer"></div>"#).empty_listing_container);
    }

    #[test]
    fn test_decision_gating() {
        let config = ExtractorConfig::builtin().escalation;
        let fired = DynamicSignals {
            ajax_inline: true,
            ..Default::default()
        };
        let quiet = DynamicSignals::default();

        assert_eq!(
            EscalationDecision::decide(&config, &fired, 0, true),
            EscalationDecision::Escalate
        );
        assert_eq!(
            EscalationDecision::decide(&config, &fired, 3, true),
            EscalationDecision::StaticSufficient
        );
        assert_eq!(
            EscalationDecision::decide(&config, &quiet, 0, true),
            EscalationDecision::NoSignals
        );
        assert_eq!(
            EscalationDecision::decide(&config, &fired, 0, false),
            EscalationDecision::NoRenderer
        );

        let mut off = config.clone();
        off.enabled = false;
        assert_eq!(
            EscalationDecision::decide(&off, &fired, 0, true),
            EscalationDecision::Disabled
        );
    }
}
