use crate::config::types::{CollectorConfig, Config, LimitRuleConfig};
use crate::url::compile_filters;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_collector_config(&config.collector)?;
    validate_seeds(&config.crawl.seeds)?;
    validate_limits(&config.limits)?;
    Ok(())
}

/// Validates collector configuration
pub fn validate_collector_config(config: &CollectorConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    compile_filters(&config.url_filters)?;
    compile_filters(&config.disallowed_url_filters)?;

    if let Some(proxy) = &config.proxy_url {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("proxy-url '{}': {}", proxy, e)))?;
    }

    if config.request_timeout_secs == Some(0) {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be > 0".to_string(),
        ));
    }

    for name in config.headers.keys() {
        if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(ConfigError::Validation(format!(
                "invalid header name '{}'",
                name
            )));
        }
    }

    Ok(())
}

/// Validates seed URLs
fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("seed '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "seed '{}' must use http or https",
                seed
            )));
        }
    }
    Ok(())
}

/// Validates limit rules
fn validate_limits(limits: &[LimitRuleConfig]) -> Result<(), ConfigError> {
    for rule in limits {
        if rule.domain_glob.is_empty() {
            return Err(ConfigError::Validation(
                "limit rule needs a domain-glob".to_string(),
            ));
        }
        if rule.parallelism == 0 && rule.delay_ms == 0 {
            return Err(ConfigError::Validation(format!(
                "limit rule '{}' sets neither parallelism nor delay-ms",
                rule.domain_glob
            )));
        }
    }
    Ok(())
}
