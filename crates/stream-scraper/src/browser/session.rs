//! Shared browser ownership.
//!
//! One browser per process, started lazily on first use. Initialization runs under
//! an async mutex so concurrent first callers wait for the same launch instead of
//! each starting their own browser.

use super::{BrowserBackend, BrowserLauncher, PageGuard};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Owns the shared browser handle and hands out fresh pages
pub struct BrowserSession {
    launcher: Box<dyn BrowserLauncher>,
    browser: Mutex<Option<Arc<dyn BrowserBackend>>>,
}

impl BrowserSession {
    pub fn new(launcher: Box<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            browser: Mutex::new(None),
        }
    }

    /// Get the shared browser, launching it if needed
    pub async fn get_browser(&self) -> Result<Arc<dyn BrowserBackend>> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            return Ok(Arc::clone(browser));
        }

        info!("Starting shared browser");
        let browser = self
            .launcher
            .launch()
            .await
            .context("Failed to start browser")?;
        *slot = Some(Arc::clone(&browser));
        Ok(browser)
    }

    /// Open a fresh page; never reused across operations
    ///
    /// If the browser cannot open a page its handle is dropped, so the next caller
    /// launches a new one instead of reusing a dead process.
    pub async fn acquire_page(&self) -> Result<PageGuard> {
        let browser = self.get_browser().await?;
        match browser.new_page().await {
            Ok(page) => {
                debug!("Page acquired");
                Ok(PageGuard::new(page))
            }
            Err(e) => {
                self.discard(&browser).await;
                Err(e.context("Failed to open page"))
            }
        }
    }

    async fn discard(&self, browser: &Arc<dyn BrowserBackend>) {
        let mut slot = self.browser.lock().await;
        // Another caller may already have replaced it
        let is_current = slot
            .as_ref()
            .map_or(false, |current| Arc::ptr_eq(current, browser));
        if is_current {
            warn!("Browser failed to open a page, discarding handle");
            slot.take();
        }
    }

    /// Close a page obtained from [`BrowserSession::acquire_page`]
    pub async fn release_page(&self, page: PageGuard) {
        page.release().await;
    }

    pub async fn is_running(&self) -> bool {
        self.browser.lock().await.is_some()
    }

    /// Close the shared browser; a later call to `get_browser` relaunches it
    pub async fn shutdown(&self) {
        let browser = self.browser.lock().await.take();
        if let Some(browser) = browser {
            info!("Shutting down shared browser");
            if let Err(e) = browser.close().await {
                warn!(error = %e, "Failed to close browser cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fake::FakeSite;
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_first_use_launches_once() -> Result<()> {
        let site = FakeSite::new().with_launch_delay(Duration::from_millis(30));
        let session = Arc::new(BrowserSession::new(site.launcher()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move {
                let page = session.acquire_page().await?;
                session.release_page(page).await;
                Ok::<_, anyhow::Error>(())
            }));
        }
        for handle in handles {
            handle.await??;
        }

        let stats = site.stats();
        assert_eq!(stats.launches, 1);
        assert_eq!(stats.opened, 5);
        assert_eq!(stats.closed, 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_allows_relaunch() -> Result<()> {
        let site = FakeSite::new();
        let session = BrowserSession::new(site.launcher());

        assert!(!session.is_running().await);
        session.get_browser().await?;
        assert!(session.is_running().await);

        session.shutdown().await;
        assert!(!session.is_running().await);

        session.get_browser().await?;
        assert_eq!(site.stats().launches, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_dead_browser_is_relaunched() -> Result<()> {
        let site = FakeSite::new().with_failing_pages(1);
        let session = BrowserSession::new(site.launcher());

        assert!(session.acquire_page().await.is_err());
        assert!(!session.is_running().await);

        let page = session.acquire_page().await?;
        session.release_page(page).await;

        let stats = site.stats();
        assert_eq!(stats.launches, 2);
        assert_eq!(stats.opened, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_discard_keeps_replacement() -> Result<()> {
        let site = FakeSite::new();
        let session = BrowserSession::new(site.launcher());

        let old = session.get_browser().await?;
        session.shutdown().await;
        let current = session.get_browser().await?;

        session.discard(&old).await;

        assert!(session.is_running().await);
        assert!(Arc::ptr_eq(&session.get_browser().await?, &current));
        assert_eq!(site.stats().launches, 2);
        Ok(())
    }
}
