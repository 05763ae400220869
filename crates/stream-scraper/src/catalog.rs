//! Catalog scraping: search and episode listings.
//!
//! The origin serves its JSON API only to a real browser context, so every call is a
//! full page navigation followed by a wait for the rendered body to become JSON.
//! Failures of any kind degrade to an empty, well-typed result.

use crate::browser::{wait_for_json_body, BrowserSession};
use crate::error::{ScrapeError, ScrapeResult};
use crate::retry::RetryPolicy;
use serde_json::Value;
use shared::config::ScraperConfig;
use shared::models::{Episode, EpisodePage, SearchResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct CatalogScraper {
    session: Arc<BrowserSession>,
    base_url: String,
    json_wait: Duration,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl CatalogScraper {
    pub fn new(session: Arc<BrowserSession>, base_url: &str, config: &ScraperConfig) -> Self {
        Self {
            session,
            base_url: base_url.trim_end_matches('/').to_string(),
            json_wait: config.json_wait_timeout(),
            poll_interval: config.poll_interval(),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Search the catalog by title
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        let url = format!(
            "{}/api?m=search&q={}",
            self.base_url,
            urlencoding::encode(query)
        );

        match self.fetch_json(&url).await.and_then(|json| parse_search_results(&json)) {
            Ok(results) => {
                info!(query = %query, count = results.len(), "Search complete");
                results
            }
            Err(e) => {
                warn!(
                    query = %query,
                    kind = e.kind(),
                    error = %e,
                    "Search failed, returning no results"
                );
                Vec::new()
            }
        }
    }

    /// One page of an anime's episode listing (pages start at 1)
    pub async fn get_episodes(&self, anime_session: &str, page: u32) -> EpisodePage {
        let page = page.max(1);
        let url = format!(
            "{}/api?m=release&id={}&sort=episode_asc&page={}",
            self.base_url,
            urlencoding::encode(anime_session),
            page
        );

        match self
            .fetch_json(&url)
            .await
            .and_then(|json| parse_episode_page(&json, anime_session))
        {
            Ok(listing) => {
                info!(
                    anime = %anime_session,
                    page = page,
                    count = listing.episodes.len(),
                    last_page = listing.last_page,
                    "Episode listing complete"
                );
                listing
            }
            Err(e) => {
                warn!(
                    anime = %anime_session,
                    page = page,
                    kind = e.kind(),
                    error = %e,
                    "Episode listing failed, returning empty page"
                );
                EpisodePage::empty()
            }
        }
    }

    async fn fetch_json(&self, url: &str) -> ScrapeResult<Value> {
        self.retry.run(url, move || self.fetch_json_once(url)).await
    }

    async fn fetch_json_once(&self, url: &str) -> ScrapeResult<Value> {
        let page = self.session.acquire_page().await?;

        let result = async {
            page.goto(url).await.map_err(|e| ScrapeError::Navigation {
                url: url.to_string(),
                reason: format!("{:#}", e),
            })?;

            // Parse anyway on timeout: the body may still be valid JSON
            let rendered = wait_for_json_body(&*page, self.json_wait, self.poll_interval).await;
            let body = page.body_text().await?;

            if looks_rate_limited(&body) {
                return Err(ScrapeError::RateLimited { attempts: 1 });
            }

            match serde_json::from_str::<Value>(body.trim()) {
                Ok(json) => Ok(json),
                Err(_) if !rendered => Err(ScrapeError::Timeout {
                    what: "JSON response".to_string(),
                    waited: self.json_wait,
                }),
                Err(e) => Err(ScrapeError::parse("JSON response", e)),
            }
        }
        .await;

        self.session.release_page(page).await;
        debug!(url = %url, ok = result.is_ok(), "Fetched API page");
        result
    }
}

/// Bot-mitigation and throttling pages rendered instead of JSON
fn looks_rate_limited(body: &str) -> bool {
    let text = body.trim();
    if text.starts_with('{') {
        return false;
    }
    let lower = text.to_ascii_lowercase();
    lower.contains("too many requests")
        || lower.contains("error 1015")
        || lower.contains("you are being rate limited")
        || text.starts_with("429")
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn as_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) != 0,
        Some(Value::String(s)) => matches!(s.trim(), "1" | "true"),
        _ => false,
    }
}

fn data_array(json: &Value) -> ScrapeResult<&Vec<Value>> {
    json.get("data")
        .and_then(Value::as_array)
        .ok_or(ScrapeError::MissingField("data"))
}

/// Map a search response; records without id, session or title are skipped
pub fn parse_search_results(json: &Value) -> ScrapeResult<Vec<SearchResult>> {
    // An empty search comes back without a data field
    if json.get("data").is_none() && json.get("total").and_then(Value::as_u64) == Some(0) {
        return Ok(Vec::new());
    }

    let records = data_array(json)?;
    let results = records
        .iter()
        .filter_map(|record| {
            let external_id = record.get("id").and_then(as_u64)?;
            let session_id = as_text(record.get("session"))?;
            let title = as_text(record.get("title"))?;
            Some(SearchResult {
                external_id,
                url: SearchResult::anime_path(&session_id),
                session_id,
                title,
                poster_url: as_text(record.get("poster")),
                status: as_text(record.get("status")),
                media_type: as_text(record.get("type")),
                episode_count: record
                    .get("episodes")
                    .and_then(as_u64)
                    .and_then(|n| u32::try_from(n).ok()),
                year: record
                    .get("year")
                    .and_then(as_u64)
                    .and_then(|n| i32::try_from(n).ok()),
                score: record.get("score").and_then(as_f64),
            })
        })
        .collect::<Vec<_>>();

    if results.len() < records.len() {
        debug!(skipped = records.len() - results.len(), "Skipped malformed search records");
    }
    Ok(results)
}

/// Map a release listing; records without id, session or episode number are skipped
pub fn parse_episode_page(json: &Value, anime_session: &str) -> ScrapeResult<EpisodePage> {
    let records = data_array(json)?;
    let episodes = records
        .iter()
        .filter_map(|record| {
            let external_id = record.get("id").and_then(as_u64)?;
            let session_id = as_text(record.get("session"))?;
            let episode_number = record.get("episode").and_then(as_f64)?;
            Some(Episode {
                external_id,
                url: Episode::play_path(anime_session, &session_id),
                session_id,
                episode_number,
                title: as_text(record.get("title")),
                duration: as_text(record.get("duration")),
                snapshot_url: as_text(record.get("snapshot")),
                audio: as_text(record.get("audio")),
                filler: as_flag(record.get("filler")),
            })
        })
        .collect();

    let last_page = json
        .get("last_page")
        .and_then(as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(1)
        .max(1);

    Ok(EpisodePage { episodes, last_page })
}
