//! Chromium backend over the DevTools protocol.
//!
//! Requires a Chrome/Chromium binary at runtime (or a remote DevTools endpoint).
//! The packed-script deobfuscation depends on this being a real script engine.

use super::{BrowserBackend, BrowserLauncher, BrowserPage};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, Headers, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig as CdpConfig, Page};
use futures::StreamExt;
use shared::config::{BrowserConfig, OriginConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Hides the most common automation tells before any origin script runs
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
"#;

const BODY_TEXT_SCRIPT: &str = "document.body ? document.body.innerText : ''";

/// Launches a local Chromium or connects to a remote one
pub struct ChromiumLauncher {
    config: BrowserConfig,
    user_agent: String,
    navigation_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserConfig, origin: &OriginConfig, navigation_timeout: Duration) -> Self {
        Self {
            config,
            user_agent: origin.user_agent.clone(),
            navigation_timeout,
        }
    }

    fn build_config(&self) -> Result<CdpConfig> {
        let mut builder = CdpConfig::builder().request_timeout(self.navigation_timeout);

        if let Some(ref executable) = self.config.executable {
            builder = builder.chrome_executable(executable);
        }

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", self.user_agent));

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg.as_str());
        }

        builder
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {}", e))
    }

    async fn connect_remote(&self, url: &str) -> Result<(Browser, chromiumoxide::Handler)> {
        info!(url = %url, "Connecting to remote browser");

        let version_url = version_endpoint(url);

        let version: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .timeout(self.navigation_timeout)
            .send()
            .await
            .context("Failed to reach remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = version
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("No webSocketDebuggerUrl in response"))?;

        Browser::connect(ws_url)
            .await
            .context("Failed to connect to remote browser")
    }
}

/// DevTools discovery endpoint for a remote browser URL
fn version_endpoint(url: &str) -> String {
    let http_url = url
        .replace("ws://", "http://")
        .replace("wss://", "https://");
    format!("{}/json/version", http_url.trim_end_matches('/'))
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserBackend>> {
        let (browser, mut handler) = match self.config.remote_url {
            Some(ref url) => self.connect_remote(url).await?,
            None => {
                info!(headless = self.config.headless, "Launching browser");
                Browser::launch(self.build_config()?)
                    .await
                    .context("Failed to launch browser")?
            }
        };

        // The CDP handler must be polled for the browser to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        Ok(Arc::new(ChromiumBrowser {
            browser: Mutex::new(browser),
            handler_task,
            user_agent: self.user_agent.clone(),
            navigation_timeout: self.navigation_timeout,
        }))
    }
}

struct ChromiumBrowser {
    browser: Mutex<Browser>,
    handler_task: JoinHandle<()>,
    user_agent: String,
    navigation_timeout: Duration,
}

#[async_trait]
impl BrowserBackend for ChromiumBrowser {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("Failed to create page")?;

        page.execute(EnableParams::default()).await?;
        page.execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await?;

        Ok(Box::new(ChromiumPage {
            page,
            navigation_timeout: self.navigation_timeout,
        }))
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.context("Failed to close browser")?;
        let _ = browser.wait().await;
        self.handler_task.abort();
        Ok(())
    }
}

struct ChromiumPage {
    page: Page,
    navigation_timeout: Duration,
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> Result<()> {
        debug!(url = %url, "Navigating");
        tokio::time::timeout(self.navigation_timeout, self.page.goto(url))
            .await
            .map_err(|_| anyhow!("Navigation to {} timed out", url))?
            .with_context(|| format!("Navigation to {} failed", url))?;
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<()> {
        let map: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
            .collect();
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::Value::Object(map),
            )))
            .await
            .context("Failed to set request headers")?;
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.context("Failed to read page content")
    }

    async fn body_text(&self) -> Result<String> {
        let value = self.evaluate(BODY_TEXT_SCRIPT).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script.to_string())
            .await
            .context("Script evaluation failed")?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn has_element(&self, selector: &str) -> Result<bool> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .context("Failed to close page")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_endpoint() {
        assert_eq!(
            version_endpoint("ws://127.0.0.1:9222/"),
            "http://127.0.0.1:9222/json/version"
        );
        assert_eq!(
            version_endpoint("http://chrome:9222"),
            "http://chrome:9222/json/version"
        );
    }
}
