//! Robots.txt parser implementation
//!
//! This module wraps the robotstxt crate's matcher, which implements the
//! standard group selection (exact product token first, `*` group as fallback).

use robotstxt::DefaultMatcher;

/// How a ruleset answers queries
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rules {
    /// Everything is allowed (missing robots.txt, 4xx)
    AllowAll,
    /// Everything is disallowed (server error while fetching robots.txt)
    DisallowAll,
    /// Parsed robots.txt content
    Content(String),
}

/// Parsed robots.txt data for one host
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    rules: Rules,
}

impl ParsedRobots {
    /// Creates a ParsedRobots from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            rules: Rules::Content(content.to_string()),
        }
    }

    /// Creates a ParsedRobots from the outcome of fetching `/robots.txt`
    ///
    /// | Status | Ruleset |
    /// |--------|---------|
    /// | 2xx | parsed body |
    /// | 4xx | allow all |
    /// | 5xx | disallow all |
    /// | other | allow all |
    pub fn from_response(status: u16, body: &str) -> Self {
        match status {
            200..=299 => Self::from_content(body),
            500..=599 => Self::disallow_all(),
            _ => Self::allow_all(),
        }
    }

    /// Creates a permissive ParsedRobots that allows everything
    pub fn allow_all() -> Self {
        Self {
            rules: Rules::AllowAll,
        }
    }

    /// Creates a ParsedRobots that disallows everything
    pub fn disallow_all() -> Self {
        Self {
            rules: Rules::DisallowAll,
        }
    }

    /// Checks if a path (with optional query) is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `path` - The escaped path to check, e.g. "/page.html?a=1"
    /// * `user_agent` - The full user agent string; groups are selected by its product token
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        match &self.rules {
            Rules::AllowAll => true,
            Rules::DisallowAll => false,
            Rules::Content(content) if content.trim().is_empty() => true,
            Rules::Content(content) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(content, product_token(user_agent), path)
            }
        }
    }
}

/// Returns the product token of a user agent: `gleaner/0.1 (+url)` → `gleaner`
fn product_token(user_agent: &str) -> &str {
    let user_agent = user_agent.trim();
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .filter(|token| !token.is_empty())
        .unwrap_or(user_agent)
}
