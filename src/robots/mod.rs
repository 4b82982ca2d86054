//! Robots.txt handling module
//!
//! This module provides parsing and per-host caching of robots.txt rulesets.
//! Fetching goes through the collector's HTTP backend (see
//! `crawler::Collector`), so robots.txt requests share cookies, proxy and
//! timeouts with regular requests.

mod cache;
mod parser;

pub use cache::RobotsCache;
pub use parser::ParsedRobots;

use crate::url::sorted_query;
use url::Url;

/// Builds the robots.txt URL for the host of `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    if robots.host_str().is_none() {
        return None;
    }
    Some(robots)
}

/// Returns the escaped path of a URL plus its re-encoded query, as tested against rules
pub fn robots_path(url: &Url) -> String {
    let mut path = url.path().to_string();
    if let Some(query) = sorted_query(url) {
        path.push('?');
        path.push_str(&query);
    }
    path
}
