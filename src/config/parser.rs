use crate::config::types::{CollectorConfig, Config};
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Prefix of environment variables overriding collector settings
pub const ENV_PREFIX: &str = "GLEANER_";

/// Loads and parses a configuration file from the given path
///
/// Environment overrides (`GLEANER_*`) are applied after parsing and before
/// validation.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use gleaner::config::load_config;
///
/// let config = load_config(Path::new("gleaner.toml")).unwrap();
/// println!("Max depth: {}", config.collector.max_depth);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config.collector, std::env::vars());
    validate(&config)?;
    Ok(config)
}

/// Parses configuration from a TOML string without validating it
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Computes a SHA-256 hash of the configuration file content
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Applies `GLEANER_*` overrides from the given environment variables
///
/// Unknown keys are logged and ignored; numeric values that fail to parse
/// leave the setting unchanged.
pub fn apply_env_overrides<I>(config: &mut CollectorConfig, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match name {
            "ALLOWED_DOMAINS" => config.allowed_domains = split_list(&value),
            "CACHE_DIR" => config.cache_dir = Some(value),
            "DETECT_CHARSET" => config.detect_charset = is_yes(&value),
            "DISABLE_COOKIES" => config.disable_cookies = true,
            "DISALLOWED_DOMAINS" => config.disallowed_domains = split_list(&value),
            "IGNORE_ROBOTSTXT" => config.ignore_robots_txt = is_yes(&value),
            "FOLLOW_REDIRECTS" => config.follow_redirects = is_yes(&value),
            "MAX_BODY_SIZE" => {
                if let Ok(size) = value.parse() {
                    config.max_body_size = size;
                }
            }
            "MAX_DEPTH" => {
                if let Ok(depth) = value.parse() {
                    config.max_depth = depth;
                }
            }
            "MAX_REQUESTS" => {
                if let Ok(max) = value.parse() {
                    config.max_requests = max;
                }
            }
            "PARSE_HTTP_ERROR_RESPONSE" => config.parse_http_error_response = is_yes(&value),
            "TRACE_HTTP" => config.trace_http = is_yes(&value),
            "USER_AGENT" => config.user_agent = value,
            unknown => tracing::warn!("Unknown environment variable: {}{}", ENV_PREFIX, unknown),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(|s| s.to_string()).collect()
}

/// Interprets "1", "yes", "true" and "y" (any case) as true
pub fn is_yes(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "yes" | "true" | "y")
}
