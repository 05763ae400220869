//! The three caller-facing operations.
//!
//! Each call reads through the tiered cache; misses are scheduled on the request
//! queue so at most one scrape runs against the origin at a time. Only non-empty
//! results are written back.
//!
//! The durable tier does synchronous SQLite I/O, so every cache access runs on the
//! blocking thread pool.

use crate::browser::{BrowserLauncher, BrowserSession, ChromiumLauncher};
use crate::cache::{
    CacheStats, DurableTier, PruneReport, ResourceClass, TieredCache, TtlPolicy,
};
use crate::catalog::CatalogScraper;
use crate::resolver::StreamResolver;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::models::{EpisodePage, ResolvedStream, SearchResult};
use shared::{Config, RequestQueue};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Results that are not worth caching when empty
trait Scraped: Serialize + DeserializeOwned + Default + Clone + Send + 'static {
    fn is_empty_result(&self) -> bool;
}

impl<T: Serialize + DeserializeOwned + Clone + Send + 'static> Scraped for Vec<T> {
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

impl Scraped for EpisodePage {
    fn is_empty_result(&self) -> bool {
        self.is_empty()
    }
}

pub struct StreamCatalog {
    queue: RequestQueue,
    cache: Arc<TieredCache>,
    scraper: Arc<CatalogScraper>,
    resolver: Arc<StreamResolver>,
    session: Arc<BrowserSession>,
}

impl StreamCatalog {
    /// Build the production stack: Chromium, SQLite-backed durable cache
    ///
    /// Must be called inside a Tokio runtime (the queue worker is spawned here).
    pub fn from_config(config: &Config) -> Self {
        let launcher = ChromiumLauncher::new(
            config.browser.clone(),
            &config.origin,
            config.scraper.navigation_timeout(),
        );

        let durable = if config.cache.durable_enabled {
            DurableTier::open(config.cache_db_path())
        } else {
            info!("Durable cache disabled by configuration");
            DurableTier::disabled()
        };
        let cache = TieredCache::new(durable, TtlPolicy::from_config(&config.cache));

        Self::new(Box::new(launcher), cache, config)
    }

    pub fn new(launcher: Box<dyn BrowserLauncher>, cache: TieredCache, config: &Config) -> Self {
        let session = Arc::new(BrowserSession::new(launcher));
        let base_url = config.origin.base_url.as_str();

        Self {
            queue: RequestQueue::new(config.scraper.min_spacing()),
            cache: Arc::new(cache),
            scraper: Arc::new(CatalogScraper::new(
                Arc::clone(&session),
                base_url,
                &config.scraper,
            )),
            resolver: Arc::new(StreamResolver::new(
                Arc::clone(&session),
                base_url,
                &config.scraper,
            )),
            session,
        }
    }

    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Vec::new();
        }

        let scraper = Arc::clone(&self.scraper);
        let key = query.clone();
        self.read_through(ResourceClass::Search, key, move || async move {
            scraper.search(&query).await
        })
        .await
    }

    pub async fn get_episodes(&self, anime_session: &str, page: u32) -> EpisodePage {
        let page = page.max(1);
        let scraper = Arc::clone(&self.scraper);
        let session = anime_session.to_string();
        let key = format!("{}:{}", anime_session, page);
        self.read_through(ResourceClass::Episodes, key, move || async move {
            scraper.get_episodes(&session, page).await
        })
        .await
    }

    pub async fn get_streams(
        &self,
        anime_session: &str,
        episode_session: &str,
    ) -> Vec<ResolvedStream> {
        let resolver = Arc::clone(&self.resolver);
        let anime = anime_session.to_string();
        let episode = episode_session.to_string();
        let key = format!("{}:{}", anime_session, episode_session);
        self.read_through(ResourceClass::Streams, key, move || async move {
            resolver.resolve(&anime, &episode).await
        })
        .await
    }

    async fn read_through<T, F, Fut>(&self, class: ResourceClass, key: String, scrape: F) -> T
    where
        T: Scraped,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if let Some(hit) = cached::<T>(&self.cache, class, &key).await {
            return hit;
        }

        debug!(
            class = %class,
            key = %key,
            queued = self.queue.len(),
            "Cache miss, scheduling scrape"
        );
        let cache = Arc::clone(&self.cache);
        let outcome = self
            .queue
            .submit(move || async move {
                // A duplicate request queued ahead of us may have filled the cache
                if let Some(hit) = cached::<T>(&cache, class, &key).await {
                    return Ok::<T, Infallible>(hit);
                }

                let value = scrape().await;
                if value.is_empty_result() {
                    debug!(class = %class, key = %key, "Empty result not cached");
                } else {
                    store(&cache, class, key, value.clone()).await;
                }
                Ok(value)
            })
            .await;

        match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(never)) => match never {},
            Err(e) => {
                warn!(class = %class, error = %e, "Scrape did not complete");
                T::default()
            }
        }
    }

    /// Sweep expired entries from both cache tiers
    pub async fn prune_cache(&self) -> PruneReport {
        let cache = Arc::clone(&self.cache);
        let report = match tokio::task::spawn_blocking(move || cache.prune()).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Cache sweep did not complete");
                PruneReport::default()
            }
        };
        info!(
            volatile = report.volatile,
            durable = report.durable,
            "Pruned cache"
        );
        report
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Close the shared browser
    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}

async fn cached<T: Scraped>(
    cache: &Arc<TieredCache>,
    class: ResourceClass,
    key: &str,
) -> Option<T> {
    let cache = Arc::clone(cache);
    let key = key.to_string();
    match tokio::task::spawn_blocking(move || cache.get::<T>(class, &key)).await {
        Ok(hit) => hit,
        Err(e) => {
            warn!(class = %class, error = %e, "Cache lookup did not complete");
            None
        }
    }
}

async fn store<T: Scraped>(
    cache: &Arc<TieredCache>,
    class: ResourceClass,
    key: String,
    value: T,
) {
    let cache = Arc::clone(cache);
    if let Err(e) = tokio::task::spawn_blocking(move || cache.set(class, &key, &value)).await {
        warn!(class = %class, error = %e, "Cache write did not complete");
    }
}
