//! Internal failure taxonomy for scraping operations.
//!
//! These errors never reach callers of the public catalog operations; they are
//! logged with their kind and then degraded to an empty result.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("response is missing field `{0}`")]
    MissingField(&'static str),

    #[error("origin rate-limited the request after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("browser error: {0:#}")]
    Browser(#[from] anyhow::Error),
}

impl ScrapeError {
    /// Short label used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Navigation { .. } => "navigation",
            ScrapeError::Timeout { .. } => "timeout",
            ScrapeError::Parse { .. } => "parse",
            ScrapeError::MissingField(_) => "missing_field",
            ScrapeError::RateLimited { .. } => "rate_limited",
            ScrapeError::Browser(_) => "browser",
        }
    }

    pub fn parse(what: impl Into<String>, reason: impl ToString) -> Self {
        ScrapeError::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ScrapeError::RateLimited { .. })
    }
}

pub type ScrapeResult<T> = std::result::Result<T, ScrapeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(ScrapeError::MissingField("data").kind(), "missing_field");
        assert_eq!(ScrapeError::parse("search json", "eof").kind(), "parse");
        assert_eq!(
            ScrapeError::Browser(anyhow::anyhow!("closed")).kind(),
            "browser"
        );
        assert!(ScrapeError::RateLimited { attempts: 3 }.is_rate_limited());
    }

    #[test]
    fn test_display() {
        let err = ScrapeError::Timeout {
            what: "resolution menu".to_string(),
            waited: Duration::from_secs(15),
        };
        assert_eq!(err.to_string(), "timed out after 15s waiting for resolution menu");
    }
}
