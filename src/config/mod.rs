//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, plus `GLEANER_*` environment overrides.
//!
//! # Example
//!
//! ```no_run
//! use gleaner::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("gleaner.toml")).unwrap();
//! println!("Collector will use max depth: {}", config.collector.max_depth);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CollectorConfig, Config, CrawlConfig, LimitRuleConfig, StorageConfig, DEFAULT_MAX_BODY_SIZE,
    DEFAULT_USER_AGENT,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, is_yes, load_config, load_config_with_hash,
    parse_config, ENV_PREFIX,
};
pub use validation::{validate, validate_collector_config};
