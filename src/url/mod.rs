//! URL handling module
//!
//! This module provides URL normalization, request fingerprinting, the scope
//! policy filter and host glob matching.

mod filter;
mod fingerprint;
mod matcher;
mod normalize;

// Re-export main functions
pub use filter::{compile_filters, UrlPolicy};
pub use fingerprint::fingerprint;
pub use matcher::matches_glob;
pub use normalize::{host_key, hostname, normalize_str, normalize_url, sorted_query};
