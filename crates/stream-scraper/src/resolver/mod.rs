//! Stream resolution.
//!
//! A player page lists its hosts in a resolution menu. Each host page either exposes
//! the media URL directly or hides it inside a packed script, which is unpacked by the
//! page's own script engine with its `eval` intercepted.

pub mod extract;

use crate::browser::{wait_for_selector, BrowserSession};
use crate::error::{ScrapeError, ScrapeResult};
use extract::{
    as_media_url, capture_script, extract_media_url, find_packed_script, parse_candidates,
    DIRECT_SOURCE_SCRIPT, MENU_BUTTON_SELECTOR,
};
use shared::config::ScraperConfig;
use shared::models::{Episode, ResolvedStream, StreamCandidate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct StreamResolver {
    session: Arc<BrowserSession>,
    base_url: String,
    menu_wait: Duration,
    poll_interval: Duration,
}

impl StreamResolver {
    pub fn new(session: Arc<BrowserSession>, base_url: &str, config: &ScraperConfig) -> Self {
        Self {
            session,
            base_url: base_url.trim_end_matches('/').to_string(),
            menu_wait: config.menu_wait_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Resolve every stream offered for an episode
    ///
    /// Candidates that cannot be resolved are dropped; an unreachable player page or
    /// a missing menu yields an empty list.
    pub async fn resolve(&self, anime_session: &str, episode_session: &str) -> Vec<ResolvedStream> {
        let candidates = match self.discover(anime_session, episode_session).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    anime = %anime_session,
                    episode = %episode_session,
                    kind = e.kind(),
                    error = %e,
                    "Stream discovery failed"
                );
                return Vec::new();
            }
        };

        if candidates.is_empty() {
            info!(episode = %episode_session, "Player page lists no streams");
            return Vec::new();
        }

        let total = candidates.len();
        let mut streams = Vec::with_capacity(total);
        // Sequential: one navigation at a time on the shared browser
        for candidate in candidates {
            match self.resolve_candidate(&candidate).await {
                Ok(url) => streams.push(ResolvedStream::new(candidate, Some(url))),
                Err(e) => warn!(
                    host = %candidate.host_url,
                    quality = %candidate.quality_label,
                    kind = e.kind(),
                    error = %e,
                    "Dropping unresolved stream candidate"
                ),
            }
        }

        info!(
            episode = %episode_session,
            resolved = streams.len(),
            total = total,
            "Stream resolution finished"
        );
        streams
    }

    /// Read the resolution menu from the player page
    pub async fn discover(
        &self,
        anime_session: &str,
        episode_session: &str,
    ) -> ScrapeResult<Vec<StreamCandidate>> {
        let url = format!(
            "{}{}",
            self.base_url,
            Episode::play_path(anime_session, episode_session)
        );
        let page = self.session.acquire_page().await?;

        let result = async {
            page.goto(&url).await.map_err(|e| ScrapeError::Navigation {
                url: url.clone(),
                reason: format!("{:#}", e),
            })?;

            let menu_ready =
                wait_for_selector(&*page, MENU_BUTTON_SELECTOR, self.menu_wait, self.poll_interval)
                    .await;
            if !menu_ready {
                return Err(ScrapeError::Timeout {
                    what: "resolution menu".to_string(),
                    waited: self.menu_wait,
                });
            }

            let html = page.content().await?;
            Ok::<_, ScrapeError>(parse_candidates(&html))
        }
        .await;

        self.session.release_page(page).await;
        result
    }

    async fn resolve_candidate(&self, candidate: &StreamCandidate) -> ScrapeResult<String> {
        let page = self.session.acquire_page().await?;

        let result = async {
            let headers = [
                ("Referer".to_string(), format!("{}/", self.base_url)),
                ("Origin".to_string(), self.base_url.clone()),
            ];
            page.set_extra_headers(&headers).await.map_err(ScrapeError::Browser)?;

            page.goto(&candidate.host_url)
                .await
                .map_err(|e| ScrapeError::Navigation {
                    url: candidate.host_url.clone(),
                    reason: format!("{:#}", e),
                })?;

            // A failing lookup only means the fast path is unavailable
            match page.evaluate(DIRECT_SOURCE_SCRIPT).await {
                Ok(value) => {
                    if let Some(url) = as_media_url(&value) {
                        debug!(host = %candidate.host_url, "Host exposes media source directly");
                        return Ok(url);
                    }
                }
                Err(e) => debug!(error = %e, "Direct source lookup failed"),
            }

            let html = page.content().await?;
            let packed =
                find_packed_script(&html).ok_or(ScrapeError::MissingField("packed script"))?;
            let unpacked = page.evaluate(&capture_script(&packed)).await?;
            let source = unpacked
                .as_str()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ScrapeError::parse("packed script", "evaluation produced no source")
                })?;

            debug!(host = %candidate.host_url, bytes = source.len(), "Unpacked player source");
            extract_media_url(source)
                .ok_or_else(|| ScrapeError::parse("unpacked source", "no media URL found"))
        }
        .await;

        self.session.release_page(page).await;
        result
    }
}
