//! Shared library for the stream-scraper workspace.
//!
//! This crate provides common functionality used by the scraper crate:
//! - Configuration management
//! - Catalog and stream data models
//! - Durable document database
//! - Rate-limited request queue
//! - Logging infrastructure

pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod queue;

// Re-export commonly used types
pub use config::Config;
pub use db::DocumentDb;
pub use logging::LogConfig;
pub use models::*;
pub use queue::{QueueError, RequestQueue};

/// Common result type using anyhow::Error
pub type Result<T> = anyhow::Result<T>;
