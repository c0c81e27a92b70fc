use std::{path::PathBuf, time::Duration};

use anyhow::{Context, anyhow, bail};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::fetch::{ClickTarget, RenderRequest};

const SELECTOR_POLL: Duration = Duration::from_millis(250);
const SETTLE_AFTER_CLICK: Duration = Duration::from_secs(2);

const CHROMIUM_CANDIDATES: &[&str] =
    &["chromium", "chromium-browser", "google-chrome", "google-chrome-stable", "chrome"];

#[derive(Clone, Debug)]
pub struct BrowserOptions {
    pub executable: Option<PathBuf>,
    /// Upper bound for one whole rendered fetch, launch to teardown.
    pub timeout: Duration,
    /// How long to wait for `RenderRequest::wait_for` to appear.
    pub wait: Duration,
}

impl BrowserOptions {
    pub fn new(executable: Option<PathBuf>, timeout: Duration, wait: Duration) -> Self {
        let executable = executable.or_else(find_system_chromium);
        if executable.is_none() {
            warn!("no Chromium executable found, rendered fetches rely on chromiumoxide detection");
        }
        Self { executable, timeout, wait }
    }
}

fn find_system_chromium() -> Option<PathBuf> {
    CHROMIUM_CANDIDATES.iter().find_map(|name| which::which(name).ok())
}

/// One headless browser process plus the task driving its CDP connection.
///
/// Dropping the session aborts the handler task and drops the `Browser`,
/// which kills the child process; `close` is the orderly path.
struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(options: &BrowserOptions) -> anyhow::Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .request_timeout(options.timeout);
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(|e| anyhow!("invalid browser config: {e}"))?;

        let (browser, mut handler) =
            Browser::launch(config).await.context("failed to launch headless browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = ?err, "browser handler error");
                }
            }
        });

        Ok(Self { browser: Some(browser), handler })
    }

    async fn render(&self, request: &RenderRequest, wait: Duration) -> anyhow::Result<String> {
        let browser = self.browser.as_ref().ok_or_else(|| anyhow!("browser already closed"))?;
        let page = browser.new_page(request.url.as_str()).await?;
        page.wait_for_navigation().await?;

        if let Some(selector) = &request.wait_for {
            wait_for_selector(&page, selector, wait).await?;
        }

        if let Some(target) = &request.click {
            if click_matching(&page, target).await? {
                tokio::time::sleep(SETTLE_AFTER_CLICK).await;
            } else {
                warn!(url = %request.url, selector = %target.selector, "no clickable element matched");
            }
        }

        let html = page.content().await?;
        if let Err(err) = page.close().await {
            debug!(error = %err, "failed to close page");
        }
        Ok(html)
    }

    async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(err) = browser.close().await {
                debug!(error = %err, "browser close failed");
            }
            if let Err(err) = browser.wait().await {
                debug!(error = %err, "browser wait failed");
            }
        }
        self.handler.abort();
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Launches a browser, renders one page, and tears the browser down on every
/// exit path: success, error, timeout and cancellation.
pub async fn render(
    options: &BrowserOptions,
    request: &RenderRequest,
    cancel: &CancellationToken,
) -> anyhow::Result<String> {
    let session = BrowserSession::launch(options).await?;

    let outcome = tokio::select! {
        _ = cancel.cancelled() => None,
        res = tokio::time::timeout(options.timeout, session.render(request, options.wait)) => Some(res),
    };

    session.close().await;

    match outcome {
        None => bail!("rendered fetch cancelled"),
        Some(Err(_)) => bail!("rendered fetch timed out after {:?}", options.timeout),
        Some(Ok(res)) => res,
    }
}

async fn wait_for_selector(page: &Page, selector: &str, wait: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if page.find_element(selector).await.is_ok() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("selector {selector:?} did not appear within {wait:?}");
        }
        tokio::time::sleep(SELECTOR_POLL).await;
    }
}

async fn click_matching(page: &Page, target: &ClickTarget) -> anyhow::Result<bool> {
    let elements = match page.find_elements(target.selector.as_str()).await {
        Ok(elements) => elements,
        Err(_) => return Ok(false),
    };

    for element in elements {
        let text = element.inner_text().await?.unwrap_or_default();
        if label_matches(&text, &target.labels) {
            element.click().await?;
            return Ok(true);
        }
    }

    Ok(false)
}

fn label_matches(text: &str, labels: &[String]) -> bool {
    let text = text.trim();
    labels.iter().any(|label| {
        if label.chars().all(|c| c.is_ascii_digit()) {
            text.split_whitespace().any(|tok| tok.trim_start_matches('0') == label.trim_start_matches('0'))
        } else {
            text.contains(label.as_str())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_labels_match_whole_tokens() {
        let labels = vec!["01/03".to_string(), "1".to_string()];
        assert!(label_matches("Ven 01/03", &labels));
        assert!(label_matches("Ven\n1", &labels));
        assert!(label_matches("01", &labels));
        assert!(!label_matches("Sab 11", &labels));
        assert!(!label_matches("Dom 10/03", &labels));
    }
}
