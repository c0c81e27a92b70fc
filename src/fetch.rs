use std::{num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wreq::header::REFERER;

use crate::browser::{self, BrowserOptions};

/// What to do with a page once a headless browser has loaded it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderRequest {
    pub url: String,
    /// CSS selector that must be present before the markup is captured.
    pub wait_for: Option<String>,
    /// Click the first element matching the selector whose text contains one
    /// of the labels, then let the page settle.
    pub click: Option<ClickTarget>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClickTarget {
    pub selector: String,
    pub labels: Vec<String>,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Default::default() }
    }

    pub fn wait_for(mut self, selector: impl Into<String>) -> Self {
        self.wait_for = Some(selector.into());
        self
    }

    pub fn click(mut self, selector: impl Into<String>, labels: Vec<String>) -> Self {
        self.click = Some(ClickTarget { selector: selector.into(), labels });
        self
    }
}

/// Retrieves raw markup. Both strategies report failure as `None`; callers
/// treat an unreachable page the same as an empty one.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Plain network fetch.
    async fn fetch(&self, url: &str) -> Option<String>;

    /// Fetch through a headless browser for script-generated pages.
    async fn fetch_rendered(&self, request: &RenderRequest) -> Option<String>;
}

pub type SharedFetcher = Arc<dyn PageFetcher>;

pub struct WebFetcher {
    client: wreq::Client,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    browser: BrowserOptions,
    cancel: CancellationToken,
}

impl WebFetcher {
    pub fn new(
        timeout: Duration,
        rps: u32,
        browser: BrowserOptions,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let client = wreq::Client::builder()
            .emulation(wreq_util::Emulation::Chrome136)
            .cookie_store(true)
            .timeout(timeout)
            .build()?;

        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(rps.max(1)).unwrap_or(NonZeroU32::MIN),
        )));

        Ok(Self { client, limiter, browser, cancel })
    }

    async fn get_text(&self, url: &str) -> Result<String, wreq::Error> {
        let referer = site_root(url);
        let mut req = self.client.get(url);
        if let Some(referer) = referer {
            req = req.header(REFERER, referer);
        }
        req.send().await?.error_for_status()?.text().await
    }
}

#[async_trait]
impl PageFetcher for WebFetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        self.limiter.until_ready().await;
        debug!(url = %url, "fetching page");

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(url = %url, "fetch cancelled");
                return None;
            }
            result = self.get_text(url) => result,
        };

        match result {
            Ok(html) => Some(html),
            Err(err) => {
                warn!(url = %url, error = %err, "page fetch failed");
                None
            },
        }
    }

    async fn fetch_rendered(&self, request: &RenderRequest) -> Option<String> {
        self.limiter.until_ready().await;
        debug!(url = %request.url, "fetching rendered page");

        match browser::render(&self.browser, request, &self.cancel).await {
            Ok(html) => Some(html),
            Err(err) => {
                warn!(url = %request.url, error = %err, "rendered fetch failed");
                None
            },
        }
    }
}

fn site_root(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(format!("{}://{}/", parsed.scheme(), host))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_root_keeps_scheme_and_host() {
        assert_eq!(
            site_root("https://www.cinessa.com/movies/showtimes/2024/03/01").as_deref(),
            Some("https://www.cinessa.com/")
        );
        assert_eq!(site_root("not a url"), None);
    }

    #[test]
    fn render_request_builder() {
        let req = RenderRequest::new("https://ucicinemas.it/cinema")
            .wait_for(".movie-container")
            .click(".calendar-day", vec!["01/03".to_string()]);
        assert_eq!(req.wait_for.as_deref(), Some(".movie-container"));
        assert_eq!(req.click.unwrap().labels, vec!["01/03"]);
    }
}
