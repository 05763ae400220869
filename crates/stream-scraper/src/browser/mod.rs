//! Browser capability boundary.
//!
//! Scraping code only talks to the [`BrowserPage`] and [`BrowserBackend`] traits.
//! Executing origin scripts (including packed player bootstraps) happens inside the
//! page's own script engine behind these traits, never in-process.

pub mod chromium;
pub mod session;

#[cfg(test)]
pub(crate) mod fake;

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

pub use chromium::ChromiumLauncher;
pub use session::BrowserSession;

/// A single, short-lived browser tab
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait for the load event
    async fn goto(&self, url: &str) -> Result<()>;

    /// Extra request headers sent with every subsequent request from this page
    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<()>;

    /// Serialized DOM of the current document
    async fn content(&self) -> Result<String>;

    /// Rendered text of `document.body`
    async fn body_text(&self) -> Result<String>;

    /// Evaluate an expression in the page and return its JSON value
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    async fn has_element(&self, selector: &str) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

/// A running browser process that hands out pages
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>>;

    async fn close(&self) -> Result<()>;
}

/// Starts (or connects to) a browser
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserBackend>>;
}

/// Exclusive handle to a page for the duration of one operation
///
/// Call [`PageGuard::release`] on every normal exit path. If the guard is dropped
/// without being released (panic, cancelled future) the page is closed on a
/// background task instead.
pub struct PageGuard {
    page: Option<Box<dyn BrowserPage>>,
}

impl PageGuard {
    pub fn new(page: Box<dyn BrowserPage>) -> Self {
        Self { page: Some(page) }
    }

    /// Close the page, logging (not propagating) close failures
    pub async fn release(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!(error = %e, "Failed to close page");
            }
        }
    }
}

impl Deref for PageGuard {
    type Target = dyn BrowserPage;

    fn deref(&self) -> &Self::Target {
        match &self.page {
            Some(page) => page.as_ref(),
            None => unreachable!("page guard used after release"),
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        debug!(error = %e, "Failed to close abandoned page");
                    }
                });
            }
        }
    }
}

/// Poll `check` until it returns true or `timeout` elapses
///
/// Returns whether the condition was observed. A failing check counts as "not yet":
/// pages are frequently mid-navigation behind bot-mitigation interstitials.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(true) = check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(interval).await;
    }
}

/// Wait until the rendered body looks like a JSON object
pub async fn wait_for_json_body(
    page: &dyn BrowserPage,
    timeout: Duration,
    interval: Duration,
) -> bool {
    poll_until(timeout, interval, move || async move {
        let text = page.body_text().await?;
        Ok(text.trim_start().starts_with('{'))
    })
    .await
}

/// Wait until `selector` matches at least one element
pub async fn wait_for_selector(
    page: &dyn BrowserPage,
    selector: &str,
    timeout: Duration,
    interval: Duration,
) -> bool {
    poll_until(timeout, interval, move || page.has_element(selector)).await
}

#[cfg(test)]
mod tests {
    use super::fake::{FakePageSpec, FakeSite};
    use super::*;

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let start = Instant::now();
        let seen = poll_until(Duration::from_millis(30), Duration::from_millis(5), || async {
            Ok(false)
        })
        .await;
        assert!(!seen);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_wait_for_json_body() -> Result<()> {
        let site = FakeSite::new()
            .page("https://origin.test/api", FakePageSpec::json(r#"  {"data":[]}"#))
            .page("https://origin.test/guard", FakePageSpec::text("Checking your browser..."));
        let backend = site.backend();

        let page = backend.new_page().await?;
        page.goto("https://origin.test/api").await?;
        let (timeout, interval) = (Duration::from_millis(20), Duration::from_millis(5));
        assert!(wait_for_json_body(page.as_ref(), timeout, interval).await);

        page.goto("https://origin.test/guard").await?;
        assert!(!wait_for_json_body(page.as_ref(), timeout, interval).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_page_guard_closes_on_drop() -> Result<()> {
        let site = FakeSite::new();
        let backend = site.backend();

        {
            let _guard = PageGuard::new(backend.new_page().await?);
        }
        // Drop closes on a spawned task
        tokio::task::yield_now().await;
        sleep(Duration::from_millis(5)).await;
        assert_eq!(site.stats().closed, 1);

        let guard = PageGuard::new(backend.new_page().await?);
        guard.release().await;
        assert_eq!(site.stats().closed, 2);
        assert_eq!(site.stats().opened, 2);
        Ok(())
    }
}
