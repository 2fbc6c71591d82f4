//! Content acquisition: render a company page and reduce it to clean text.
//!
//! Rendering is behind the [`PageRenderer`] trait:
//! - **[`HttpRenderer`]**: plain `GET`, no script execution (default).
//! - **`ChromiumRenderer`**: headless Chromium via `chromiumoxide` (feature
//!   `browser`). Every render launches a browser on its own
//!   [`BrowserProfile`] and tears both down before returning, on success
//!   and on every error path.
//!
//! [`Acquirer::fetch`] never fails. A render error, a timeout or a page
//! with no readable text yields [`Outcome::Degraded`] whose document holds
//! [`fallback_text`] for the URL.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use scraper::{ElementRef, Html};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AcquireConfig;
use crate::models::{Outcome, RawDocument};

/// Subtrees that never carry page content.
const SKIPPED_ELEMENTS: [&str; 7] = [
    "script", "style", "nav", "footer", "header", "noscript", "template",
];

/// Produces the HTML of a page.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &str;
    async fn render(&self, url: &str) -> Result<String>;
}

// ============ Acquirer ============

pub struct Acquirer {
    renderer: Arc<dyn PageRenderer>,
    timeout: Duration,
}

impl Acquirer {
    pub fn new(renderer: Arc<dyn PageRenderer>, timeout: Duration) -> Self {
        Self { renderer, timeout }
    }

    pub fn from_config(config: &AcquireConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let renderer: Arc<dyn PageRenderer> = match config.renderer.as_str() {
            "http" => Arc::new(HttpRenderer::new(timeout)?),
            #[cfg(feature = "browser")]
            "chromium" => Arc::new(ChromiumRenderer::new(config)),
            #[cfg(not(feature = "browser"))]
            "chromium" => bail!("acquire.renderer = \"chromium\" requires --features browser"),
            other => bail!("Unknown acquire renderer: {}", other),
        };
        // The renderer enforces its own timeout; this outer bound also
        // covers browser launch and teardown.
        Ok(Self::new(renderer, timeout + Duration::from_secs(15)))
    }

    /// Fetch and clean `url`. Always returns a document with non-empty text.
    pub async fn fetch(&self, url: &str) -> Outcome<RawDocument> {
        let url = normalize_url(url);
        debug!(url = %url, renderer = self.renderer.name(), "acquiring page");

        let failure = match tokio::time::timeout(self.timeout, self.renderer.render(&url)).await {
            Ok(Ok(html)) => {
                let text = clean_html(&html);
                if !text.is_empty() {
                    info!(url = %url, chars = text.len(), "page acquired");
                    return Outcome::Ok(document(&url, text));
                }
                "page contained no readable text".to_string()
            }
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!("render timed out after {}s", self.timeout.as_secs()),
        };

        warn!(url = %url, reason = %failure, "acquisition failed, using fallback text");
        Outcome::degraded(failure, document(&url, fallback_text(&url)))
    }
}

fn document(url: &str, text: String) -> RawDocument {
    RawDocument {
        text,
        source_url: url.to_string(),
        retrieved_at: Utc::now(),
    }
}

/// Placeholder used when a page cannot be acquired.
pub fn fallback_text(url: &str) -> String {
    format!(
        "Website content for {} could not be retrieved; no company-specific background is available.",
        url
    )
}

/// Prefix bare hostnames with `https://`.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

// ============ Cleaning ============

/// Strip non-content markup and return one trimmed text line per text
/// node, blank lines removed, joined with `\n`.
pub fn clean_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();
    collect_text(document.root_element(), &mut lines);
    lines.join("\n")
}

fn collect_text(element: ElementRef<'_>, lines: &mut Vec<String>) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            if !SKIPPED_ELEMENTS.contains(&child_element.value().name()) {
                collect_text(child_element, lines);
            }
        } else if let Some(text) = child.value().as_text() {
            lines.extend(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
        }
    }
}

// ============ HTTP renderer ============

pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("readiness-report/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    fn name(&self) -> &str {
        "http"
    }

    async fn render(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} returned HTTP {}", url, status);
        }
        Ok(response.text().await?)
    }
}

// ============ Browser profile ============

/// A throwaway browser user-data directory, removed when dropped.
pub struct BrowserProfile {
    dir: tempfile::TempDir,
}

impl BrowserProfile {
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("readiness-profile-")
            .tempdir()
            .context("Failed to create browser profile directory")?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

// ============ Chromium renderer ============

#[cfg(feature = "browser")]
pub struct ChromiumRenderer {
    executable: Option<std::path::PathBuf>,
    timeout: Duration,
    settle: Duration,
}

#[cfg(feature = "browser")]
impl ChromiumRenderer {
    pub fn new(config: &AcquireConfig) -> Self {
        Self {
            executable: config.chrome_executable.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            settle: Duration::from_millis(config.settle_ms),
        }
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl PageRenderer for ChromiumRenderer {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn render(&self, url: &str) -> Result<String> {
        use chromiumoxide::{Browser, BrowserConfig};
        use futures::StreamExt;

        let profile = BrowserProfile::create()?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile.path())
            .request_timeout(self.timeout)
            .args(["--disable-gpu", "--no-sandbox", "--disable-dev-shm-usage"]);
        if let Some(bin) = &self.executable {
            builder = builder.chrome_executable(bin);
        }
        let browser_config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("invalid browser config: {}", e))?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch Chromium")?;
        let pump = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let settle = self.settle;
        let rendered = tokio::time::timeout(self.timeout, async {
            let page = browser.new_page(url).await?;
            page.wait_for_navigation().await?;
            tokio::time::sleep(settle).await;
            page.content().await
        })
        .await;

        // Teardown runs on every path before the result is inspected.
        if let Err(e) = browser.close().await {
            debug!(error = %e, "browser close failed");
        }
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "browser wait failed");
        }
        pump.abort();
        drop(profile);

        match rendered {
            Ok(Ok(html)) => Ok(html),
            Ok(Err(e)) => Err(anyhow::anyhow!("navigation to {} failed: {}", url, e)),
            Err(_) => bail!("render of {} timed out after {}s", url, self.timeout.as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticRenderer(Result<String, String>);

    #[async_trait]
    impl PageRenderer for StaticRenderer {
        fn name(&self) -> &str {
            "static"
        }
        async fn render(&self, _url: &str) -> Result<String> {
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    struct SlowRenderer;

    #[async_trait]
    impl PageRenderer for SlowRenderer {
        fn name(&self) -> &str {
            "slow"
        }
        async fn render(&self, _url: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("<p>late</p>".to_string())
        }
    }

    const PAGE: &str = r#"<html><head><title>Acme Corp</title>
        <style>body { color: red }</style><script>track()</script></head>
        <body>
          <header>Site header</header>
          <nav><a href="/">Home</a></nav>
          <main>
            <h1>  Acme builds rockets  </h1>
            <p>We serve   customers
               worldwide.</p>
          </main>
          <footer>© Acme</footer>
        </body></html>"#;

    #[test]
    fn test_clean_html_strips_chrome() {
        let text = clean_html(PAGE);
        assert_eq!(
            text,
            "Acme Corp\nAcme builds rockets\nWe serve   customers\nworldwide."
        );
        assert!(!text.contains("track()"));
        assert!(!text.contains("Site header"));
        assert!(!text.contains("Home"));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let acquirer = Acquirer::new(
            Arc::new(StaticRenderer(Ok(PAGE.to_string()))),
            Duration::from_secs(1),
        );
        let out = acquirer.fetch("acme.test").await;
        assert!(!out.is_degraded());
        let doc = out.into_value();
        assert_eq!(doc.source_url, "https://acme.test");
        assert!(doc.text.contains("rockets"));
    }

    #[tokio::test]
    async fn test_fetch_failure_returns_fallback() {
        let acquirer = Acquirer::new(
            Arc::new(StaticRenderer(Err("connection refused".to_string()))),
            Duration::from_secs(1),
        );
        let out = acquirer.fetch("https://down.test").await;
        assert_eq!(out.reason(), Some("connection refused"));
        assert_eq!(out.value().text, fallback_text("https://down.test"));
    }

    #[tokio::test]
    async fn test_fetch_empty_page_returns_fallback() {
        let acquirer = Acquirer::new(
            Arc::new(StaticRenderer(Ok("<script>only()</script>".to_string()))),
            Duration::from_secs(1),
        );
        let out = acquirer.fetch("https://empty.test").await;
        assert!(out.is_degraded());
        assert!(!out.value().text.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_timeout_returns_fallback() {
        let acquirer = Acquirer::new(Arc::new(SlowRenderer), Duration::from_millis(50));
        let out = acquirer.fetch("https://slow.test").await;
        assert!(out.reason().unwrap().contains("timed out"));
        assert!(out.value().text.contains("https://slow.test"));
    }

    #[tokio::test]
    async fn test_http_renderer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/about"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let acquirer = Acquirer::new(
            Arc::new(HttpRenderer::new(Duration::from_secs(5)).unwrap()),
            Duration::from_secs(5),
        );
        let ok = acquirer.fetch(&format!("{}/about", server.uri())).await;
        assert!(!ok.is_degraded());

        let missing = acquirer.fetch(&format!("{}/missing", server.uri())).await;
        assert!(missing.reason().unwrap().contains("404"));
    }

    #[test]
    fn test_profile_removed_on_drop() {
        let profile = BrowserProfile::create().unwrap();
        let dir = profile.path().to_path_buf();
        assert!(dir.exists());
        drop(profile);
        assert!(!dir.exists());

        let a = BrowserProfile::create().unwrap();
        let b = BrowserProfile::create().unwrap();
        assert_ne!(a.path(), b.path());
    }
}
