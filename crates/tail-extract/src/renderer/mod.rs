//! Renderer abstraction for browser-based page rendering.
//!
//! Escalation only ever needs one browser for one page, so the launcher is
//! the seam: callers pass a [`RendererLauncher`] and the escalation
//! controller owns the renderer for exactly one render.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;

/// Starts a browser engine on demand.
#[async_trait]
pub trait RendererLauncher: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;
    async fn launch(&self) -> Result<Box<dyn Renderer>>;
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context (tab) for rendering pages.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Load `url` and return the URL the page ended on. The caller bounds
    /// how long this may take.
    async fn navigate(&mut self, url: &str) -> Result<String>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}
