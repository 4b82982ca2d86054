use crate::config::CollectorConfig;
use crate::{ConfigError, CrawlError};
use regex::Regex;

/// Scope policy evaluated before every fetch and every redirect hop
///
/// The policy is a pure function of its configuration: domain allow/deny
/// lists compared by exact, case-sensitive equality, and URL regex filters.
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    allowed_domains: Vec<String>,
    disallowed_domains: Vec<String>,
    url_filters: Vec<Regex>,
    disallowed_url_filters: Vec<Regex>,
}

impl UrlPolicy {
    /// Creates a policy from already compiled filters
    pub fn new(
        allowed_domains: Vec<String>,
        disallowed_domains: Vec<String>,
        url_filters: Vec<Regex>,
        disallowed_url_filters: Vec<Regex>,
    ) -> Self {
        Self {
            allowed_domains,
            disallowed_domains,
            url_filters,
            disallowed_url_filters,
        }
    }

    /// Builds a policy from configuration, compiling the filter patterns
    pub fn from_config(config: &CollectorConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.allowed_domains.clone(),
            config.disallowed_domains.clone(),
            compile_filters(&config.url_filters)?,
            compile_filters(&config.disallowed_url_filters)?,
        ))
    }

    /// Checks a URL and its hostname against the policy
    ///
    /// Checks run in this order, first failure wins:
    /// 1. Any disallowed URL filter matches → `ForbiddenUrl`
    /// 2. URL filters are configured and none matches → `NoUrlFiltersMatch`
    /// 3. Domain is denied, or an allow list exists without it → `ForbiddenDomain`
    pub fn check(&self, url: &str, domain: &str) -> Result<(), CrawlError> {
        if self.disallowed_url_filters.iter().any(|f| f.is_match(url)) {
            return Err(CrawlError::ForbiddenUrl);
        }

        if !self.url_filters.is_empty() && !self.url_filters.iter().any(|f| f.is_match(url)) {
            return Err(CrawlError::NoUrlFiltersMatch);
        }

        if !self.is_domain_allowed(domain) {
            return Err(CrawlError::ForbiddenDomain);
        }

        Ok(())
    }

    /// Returns true if the domain passes the allow/deny lists
    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        if self.disallowed_domains.iter().any(|d| d == domain) {
            return false;
        }

        self.allowed_domains.is_empty() || self.allowed_domains.iter().any(|d| d == domain)
    }
}

/// Compiles a list of regex patterns
pub fn compile_filters(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", p, e))))
        .collect()
}
