//! Chromium-based renderer using chromiumoxide.

use super::{RenderContext, Renderer, RendererLauncher};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Environment variable naming an explicit Chromium binary.
pub const CHROMIUM_PATH_ENV: &str = "TAILMATCH_CHROMIUM_PATH";

/// Chrome-for-Testing layouts under `~/.tailmatch/chromium`.
#[cfg(target_os = "macos")]
const BUNDLED: &[&str] = &[
    "chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome",
];
#[cfg(not(target_os = "macos"))]
const BUNDLED: &[&str] = &["chrome-linux64/chrome", "chrome"];

const SYSTEM_BINARIES: [&str; 3] = ["google-chrome", "chromium", "chromium-browser"];

const MACOS_APP: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

/// Locate a Chromium binary: `TAILMATCH_CHROMIUM_PATH`, then the bundled
/// download, then `PATH`, then the standard macOS install.
pub fn find_chromium() -> Option<PathBuf> {
    let explicit = std::env::var_os(CHROMIUM_PATH_ENV).map(PathBuf::from);
    let bundled = dirs::home_dir().into_iter().flat_map(|home| {
        let root = home.join(".tailmatch").join("chromium");
        BUNDLED.iter().map(move |rel| root.join(rel))
    });

    explicit
        .into_iter()
        .chain(bundled)
        .find(|path| path.exists())
        .or_else(|| SYSTEM_BINARIES.iter().find_map(|name| which::which(name).ok()))
        .or_else(|| {
            let app = PathBuf::from(MACOS_APP);
            (cfg!(target_os = "macos") && app.exists()).then_some(app)
        })
}

/// Proxy from the usual environment variables, HTTPS first.
pub fn proxy_from_env() -> Option<String> {
    ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
}

/// Launches one headless Chromium per escalation.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    executable: PathBuf,
    proxy: Option<String>,
}

impl ChromiumLauncher {
    pub fn new(executable: PathBuf, proxy: Option<String>) -> Self {
        Self { executable, proxy }
    }

    /// A launcher for the locally installed Chromium, or `None` when no
    /// binary can be found.
    pub fn detect() -> Option<Self> {
        find_chromium().map(|path| Self::new(path, proxy_from_env()))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl RendererLauncher for ChromiumLauncher {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn launch(&self) -> Result<Box<dyn Renderer>> {
        let renderer = ChromiumRenderer::launch(&self.executable, self.proxy.as_deref()).await?;
        Ok(Box::new(renderer))
    }
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance.
    pub async fn launch(executable: &Path, proxy: Option<&str>) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .chrome_executable(executable)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking");
        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });
        debug!(executable = %executable.display(), "chromium launched");

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.context("failed to close Chromium");
        let _ = browser.wait().await;
        self.handler.abort();
        closed.map(|_| ())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium page context.
pub struct ChromiumContext {
    page: Page,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str) -> Result<String> {
        if let Err(e) = self.page.goto(url).await {
            bail!("navigation to {url} failed: {e}");
        }
        let landed = self.page.url().await.ok().flatten();
        Ok(landed.unwrap_or_else(|| url.to_string()))
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn get_html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")?;

        let html: String = result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))?;

        Ok(html)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_path_must_exist() {
        // A bogus explicit path is skipped rather than returned.
        std::env::set_var(CHROMIUM_PATH_ENV, "/nonexistent/chrome-for-tail-extract");
        let found = find_chromium();
        std::env::remove_var(CHROMIUM_PATH_ENV);
        assert_ne!(
            found,
            Some(PathBuf::from("/nonexistent/chrome-for-tail-extract"))
        );
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_render_data_url() {
        let launcher = ChromiumLauncher::detect().expect("Chromium not found");
        let renderer = launcher.launch().await.expect("failed to launch");
        let mut ctx = renderer
            .new_context()
            .await
            .expect("failed to create context");

        ctx.navigate(
            "data:text/html,<ul id=list></ul><script>document.getElementById('list').innerHTML='<li>保護猫 たま メス 2歳</li>'</script>",
        )
        .await
        .expect("navigation failed");

        let html = ctx.get_html().await.expect("get_html failed");
        assert!(html.contains("<li>保護猫 たま メス 2歳</li>"));

        ctx.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);

        renderer.shutdown().await.expect("shutdown failed");
    }
}
