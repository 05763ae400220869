//! Scripted in-memory browser for tests.
//!
//! Pages are looked up by exact URL. Script evaluation understands the two
//! expressions the resolver sends: the direct-source lookup and the packed-script
//! capture wrapper.

use super::{BrowserBackend, BrowserLauncher, BrowserPage};
use crate::resolver::extract::{CAPTURE_MARKER, DIRECT_SOURCE_SCRIPT};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct FakePageSpec {
    pub body_text: String,
    pub html: String,
    pub selectors: Vec<String>,
    pub window_source: Option<String>,
    pub unpacked: Option<String>,
    pub fail_navigation: bool,
}

impl FakePageSpec {
    pub fn json(body: &str) -> Self {
        Self::text(body)
    }

    pub fn text(body: &str) -> Self {
        Self {
            body_text: body.to_string(),
            html: format!("<html><body><pre>{}</pre></body></html>", body),
            ..Default::default()
        }
    }

    pub fn html(html: &str) -> Self {
        Self {
            html: html.to_string(),
            ..Default::default()
        }
    }

    pub fn with_selector(mut self, selector: &str) -> Self {
        self.selectors.push(selector.to_string());
        self
    }

    pub fn with_window_source(mut self, url: &str) -> Self {
        self.window_source = Some(url.to_string());
        self
    }

    pub fn with_unpacked(mut self, source: &str) -> Self {
        self.unpacked = Some(source.to_string());
        self
    }

    pub fn failing() -> Self {
        Self {
            fail_navigation: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeStats {
    pub launches: usize,
    pub opened: usize,
    pub closed: usize,
    pub visited: Vec<String>,
    pub evaluated: Vec<String>,
    pub headers: Vec<(String, String)>,
}

#[derive(Default)]
struct SiteState {
    pages: HashMap<String, FakePageSpec>,
    stats: Mutex<FakeStats>,
}

/// A fake origin; clone freely, all clones share state
#[derive(Clone, Default)]
pub struct FakeSite {
    state: Arc<SiteState>,
    launch_delay: Duration,
    launch_counter: Arc<AtomicUsize>,
    failing_pages: Arc<AtomicUsize>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a page (only valid before the site is shared)
    pub fn page(mut self, url: &str, spec: FakePageSpec) -> Self {
        Arc::get_mut(&mut self.state)
            .expect("register fake pages before sharing the site")
            .pages
            .insert(url.to_string(), spec);
        self
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    /// The next `count` calls to open a page fail as if the browser had died
    pub fn with_failing_pages(self, count: usize) -> Self {
        self.failing_pages.store(count, Ordering::SeqCst);
        self
    }

    pub fn backend(&self) -> Arc<dyn BrowserBackend> {
        Arc::new(FakeBackend { site: self.clone() })
    }

    pub fn launcher(&self) -> Box<dyn BrowserLauncher> {
        Box::new(self.clone())
    }

    pub fn stats(&self) -> FakeStats {
        let mut stats = self.state.stats.lock().unwrap().clone();
        stats.launches = self.launch_counter.load(Ordering::SeqCst);
        stats
    }

    fn record<F: FnOnce(&mut FakeStats)>(&self, f: F) {
        f(&mut self.state.stats.lock().unwrap());
    }
}

#[async_trait]
impl BrowserLauncher for FakeSite {
    async fn launch(&self) -> Result<Arc<dyn BrowserBackend>> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        self.launch_counter.fetch_add(1, Ordering::SeqCst);
        Ok(self.backend())
    }
}

struct FakeBackend {
    site: FakeSite,
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>> {
        let failing = &self.site.failing_pages;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("Target closed: browser process exited"));
        }
        self.site.record(|s| s.opened += 1);
        Ok(Box::new(FakePage {
            site: self.site.clone(),
            current: Mutex::new(None),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct FakePage {
    site: FakeSite,
    current: Mutex<Option<FakePageSpec>>,
}

impl FakePage {
    fn current(&self) -> Result<FakePageSpec> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("no document loaded"))
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.site.record(|s| s.visited.push(url.to_string()));
        let spec = self
            .site
            .state
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("net::ERR_NAME_NOT_RESOLVED at {}", url))?;
        if spec.fail_navigation {
            return Err(anyhow!("net::ERR_CONNECTION_RESET at {}", url));
        }
        *self.current.lock().unwrap() = Some(spec);
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &[(String, String)]) -> Result<()> {
        self.site
            .record(|s| s.headers.extend(headers.iter().cloned()));
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        Ok(self.current()?.html)
    }

    async fn body_text(&self) -> Result<String> {
        Ok(self.current()?.body_text)
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.site.record(|s| s.evaluated.push(script.to_string()));
        let spec = self.current()?;
        if script == DIRECT_SOURCE_SCRIPT {
            return Ok(Value::String(spec.window_source.unwrap_or_default()));
        }
        if script.contains(CAPTURE_MARKER) {
            return Ok(Value::String(spec.unpacked.unwrap_or_default()));
        }
        Err(anyhow!("fake page cannot evaluate script"))
    }

    async fn has_element(&self, selector: &str) -> Result<bool> {
        Ok(self.current()?.selectors.iter().any(|s| s == selector))
    }

    async fn close(&self) -> Result<()> {
        self.site.record(|s| s.closed += 1);
        Ok(())
    }
}
