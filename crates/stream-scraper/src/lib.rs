//! Browser-driven catalog and stream scraper.
//!
//! This library provides:
//! - A shared headless browser with short-lived pages
//! - Catalog search and episode listings rendered through that browser
//! - Stream resolution, including packed-script deobfuscation
//! - A two-tier (volatile + durable) cache in front of all of it

pub mod browser;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod resolver;
pub mod retry;
pub mod service;

pub use browser::{BrowserSession, ChromiumLauncher};
pub use cache::{ResourceClass, TieredCache, TtlPolicy};
pub use catalog::CatalogScraper;
pub use error::{ScrapeError, ScrapeResult};
pub use resolver::StreamResolver;
pub use retry::RetryPolicy;
pub use service::StreamCatalog;
