//! Gleaner: a callback-driven crawl orchestration engine
//!
//! This crate decides whether a candidate URL may be fetched (domain lists, URL
//! filters, depth and request budgets, robots.txt, fingerprint deduplication),
//! performs the fetch inline or on a tracked background task, re-applies the
//! same policy on every redirect hop, and routes the outcome through ordered
//! extension callbacks.

pub mod config;
pub mod crawler;
pub mod robots;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Malformed URL: {0}")]
    MalformedUrl(#[from] UrlError),

    #[error("Forbidden domain")]
    ForbiddenDomain,

    #[error("Forbidden URL")]
    ForbiddenUrl,

    #[error("No URL filters match")]
    NoUrlFiltersMatch,

    #[error("Max depth limit reached")]
    MaxDepth,

    #[error("Max requests limit reached")]
    MaxRequests,

    #[error("URL blocked by robots.txt")]
    RobotsTxtBlocked,

    #[error("\"{destination}\" already visited")]
    AlreadyVisited { destination: ::url::Url },

    #[error("Retry body unseekable")]
    RetryBodyUnseekable,

    #[error("Aborted after receiving response headers")]
    AbortedAfterHeaders,

    #[error("Not following redirect to \"{url}\": {source}")]
    RedirectBlocked {
        url: ::url::Url,
        #[source]
        source: Box<CrawlError>,
    },

    #[error("{reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Extraction error for {url}: {message}")]
    Extraction { url: String, message: String },

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Cookie jar is not available")]
    NoCookieJar,

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Returns the policy error behind a blocked redirect, or `self` otherwise
    pub fn policy_cause(&self) -> &CrawlError {
        match self {
            CrawlError::RedirectBlocked { source, .. } => source.policy_cause(),
            other => other,
        }
    }

    /// Returns true if the request was rejected by fingerprint deduplication
    pub fn is_already_visited(&self) -> bool {
        matches!(self.policy_cause(), CrawlError::AlreadyVisited { .. })
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid URL filter pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Missing host in URL: {0}")]
    MissingHost(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::{CollectorConfig, Config};
pub use crawler::{
    CallbackId, Collector, CollectorBuilder, Context, Element, Request, RequestBody, Response,
};
pub use storage::{InMemoryStorage, SqliteStorage, Storage};
pub use crate::url::{fingerprint, normalize_url, UrlPolicy};
