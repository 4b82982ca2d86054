use serde::Deserialize;
use std::collections::BTreeMap;

/// Default user agent sent when none is configured
pub const DEFAULT_USER_AGENT: &str = "gleaner/0.1 (+https://github.com/gleaner-rs/gleaner)";

/// Default response body limit (10 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Top-level configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, rename = "limit")]
    pub limits: Vec<LimitRuleConfig>,
}

/// Collector policy and behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CollectorConfig {
    /// User-Agent header sent when a request does not set one
    pub user_agent: String,

    /// Headers added to every request that does not bring its own header set
    pub headers: BTreeMap<String, String>,

    /// Maximum crawl depth (0 = unlimited, seeds are depth 1)
    pub max_depth: u32,

    /// Maximum number of requests issued by the collector (0 = unlimited)
    pub max_requests: u32,

    /// Hostnames allowed to be visited (empty = all)
    pub allowed_domains: Vec<String>,

    /// Hostnames that are never visited
    pub disallowed_domains: Vec<String>,

    /// Regex patterns; when present, a URL must match at least one
    pub url_filters: Vec<String>,

    /// Regex patterns; a URL matching any of them is rejected
    pub disallowed_url_filters: Vec<String>,

    /// Disables fingerprint deduplication
    pub allow_url_revisit: bool,

    /// Response bodies are truncated to this many bytes (0 = unlimited)
    pub max_body_size: usize,

    /// Directory for the on-disk GET response cache
    pub cache_dir: Option<String>,

    /// Skips robots.txt checks entirely
    pub ignore_robots_txt: bool,

    /// Runs every fetch on its own task; errors are only reported to error callbacks
    #[serde(rename = "async")]
    pub async_mode: bool,

    /// Dispatches responses with status >= 203 to response callbacks instead of error callbacks
    pub parse_http_error_response: bool,

    /// Treats undeclared non-UTF-8 text bodies as Latin-1
    pub detect_charset: bool,

    /// Issues a HEAD request before every `visit`
    pub check_head: bool,

    /// Records request timings on responses
    pub trace_http: bool,

    /// Follows redirects (subject to the redirect interceptor)
    pub follow_redirects: bool,

    /// Disables the storage-backed cookie jar
    pub disable_cookies: bool,

    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,

    /// Proxy used for every request
    pub proxy_url: Option<String>,

    /// Fixed collector id (a fresh unique id is generated otherwise)
    pub id: Option<u32>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: BTreeMap::new(),
            max_depth: 0,
            max_requests: 0,
            allowed_domains: Vec::new(),
            disallowed_domains: Vec::new(),
            url_filters: Vec::new(),
            disallowed_url_filters: Vec::new(),
            allow_url_revisit: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            cache_dir: None,
            ignore_robots_txt: true,
            async_mode: false,
            parse_http_error_response: false,
            detect_charset: false,
            check_head: false,
            trace_http: false,
            follow_redirects: true,
            disable_cookies: false,
            request_timeout_secs: None,
            proxy_url: None,
            id: None,
        }
    }
}

/// Settings used by the command-line crawler
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlConfig {
    /// URLs visited at depth 1
    pub seeds: Vec<String>,

    /// Follows links matched by `link-selector`
    pub follow_links: bool,

    /// CSS selector for followed links; the `href` attribute is visited
    pub link_selector: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            follow_links: true,
            link_selector: "a[href]".to_string(),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file (in-memory storage when absent)
    pub database_path: Option<String>,
}

/// Rate limit rule for hosts matching a glob
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LimitRuleConfig {
    /// Host glob (e.g. "*" or "*.example.com")
    pub domain_glob: String,

    /// Maximum concurrent requests to matching hosts (0 is treated as 1)
    #[serde(default)]
    pub parallelism: usize,

    /// Minimum delay between requests to matching hosts (milliseconds)
    #[serde(default)]
    pub delay_ms: u64,
}
