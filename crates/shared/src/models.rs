//! Data models for the project.
//!
//! This module defines the catalog and stream structures returned to callers.
//! Field names serialize in camelCase, which is what the API layer forwards.

use serde::{Deserialize, Serialize};

/// One title returned by a catalog search
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub external_id: u64,
    /// Opaque origin key for this title; joins search -> episodes -> streams
    pub session_id: String,
    pub title: String,
    /// Deep link relative to the origin ("/anime/{session}")
    pub url: String,
    pub poster_url: Option<String>,
    pub status: Option<String>,
    pub media_type: Option<String>,
    pub episode_count: Option<u32>,
    pub year: Option<i32>,
    pub score: Option<f64>,
}

impl SearchResult {
    pub fn anime_path(session_id: &str) -> String {
        format!("/anime/{}", session_id)
    }
}

/// One page of an episode listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EpisodePage {
    pub episodes: Vec<Episode>,
    /// Always >= 1
    pub last_page: u32,
}

impl EpisodePage {
    /// The degraded result returned whenever a listing cannot be scraped
    pub fn empty() -> Self {
        Self {
            episodes: Vec::new(),
            last_page: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }
}

impl Default for EpisodePage {
    fn default() -> Self {
        Self::empty()
    }
}

/// A single episode within an anime session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub external_id: u64,
    /// Scoped to the parent anime session
    pub session_id: String,
    /// Fractional for specials (e.g. 12.5)
    pub episode_number: f64,
    /// Player deep link ("/play/{anime}/{episode}")
    pub url: String,
    pub title: Option<String>,
    pub duration: Option<String>,
    pub snapshot_url: Option<String>,
    pub audio: Option<String>,
    pub filler: bool,
}

impl Episode {
    pub fn play_path(anime_session: &str, episode_session: &str) -> String {
        format!("/play/{}/{}", anime_session, episode_session)
    }
}

/// Raw entry from a player page's resolution menu
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamCandidate {
    pub quality_label: String,
    pub audio_label: String,
    pub host_url: String,
}

/// A stream candidate after deobfuscation
///
/// `direct_media_url` is `None` when the host page could not be unpacked; callers
/// should fall back to embedding `host_url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStream {
    #[serde(flatten)]
    pub candidate: StreamCandidate,
    pub direct_media_url: Option<String>,
    pub is_hls: bool,
}

impl ResolvedStream {
    pub fn new(candidate: StreamCandidate, direct_media_url: Option<String>) -> Self {
        let is_hls = direct_media_url
            .as_deref()
            .map(is_hls_url)
            .unwrap_or(false);
        Self {
            candidate,
            direct_media_url,
            is_hls,
        }
    }
}

/// Adaptive-streaming playlists are served as `.m3u8`
pub fn is_hls_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".m3u8")
}
