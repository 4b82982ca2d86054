//! Redirect interceptor
//!
//! The HTTP backend asks the collector before following every redirect hop.
//! Each hop is admitted like a new request: the URL policy runs again and the
//! target is deduplicated unless the chain is looping back to the page it
//! started from.

use crate::crawler::{Collector, OutboundRequest, RequestBody};
use crate::url::{host_key, hostname, normalize_str};
use crate::{CrawlError, Result};
use reqwest::header::AUTHORIZATION;
use std::sync::Arc;
use url::Url;

/// Redirect hops followed before the last response is used as is
pub const MAX_REDIRECTS: usize = 10;

/// Outcome of a redirect check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Send the next hop
    Follow,
    /// Stop and hand the redirect response itself to the dispatcher
    UseLastResponse,
}

/// Caller-supplied redirect policy
///
/// Receives the next hop (mutable, so headers can be rewritten) and the URLs
/// already requested in the chain, oldest first. Its decision replaces the
/// default hop cap and header stripping.
pub type RedirectHandler =
    Arc<dyn Fn(&mut OutboundRequest, &[Url]) -> Result<RedirectDecision> + Send + Sync>;

impl Collector {
    pub(crate) fn check_redirect(
        &self,
        next: &mut OutboundRequest,
        via: &[Url],
    ) -> Result<RedirectDecision> {
        let inner = &self.inner;

        if let Err(e) = inner.policy.check(next.url.as_str(), &hostname(&next.url)) {
            tracing::debug!("Redirect to {} blocked: {}", next.url, e);
            return Err(CrawlError::RedirectBlocked {
                url: next.url.clone(),
                source: Box::new(e),
            });
        }

        let same_page = via
            .first()
            .map(|first| normalize_str(next.url.as_str()) == normalize_str(first.as_str()))
            .unwrap_or(false);

        if !inner.config.allow_url_revisit && !same_page {
            let body = next.body.as_ref().and_then(RequestBody::as_bytes);
            self.check_and_record(&next.url, body)?;
        }

        if let Some(handler) = &inner.redirect_handler {
            return handler(next, via);
        }

        if via.len() >= MAX_REDIRECTS {
            tracing::debug!("Redirect limit reached at {}", next.url);
            return Ok(RedirectDecision::UseLastResponse);
        }

        if let Some(last) = via.last() {
            if host_key(&next.url) != host_key(last) {
                next.headers.remove(AUTHORIZATION);
            }
        }

        Ok(RedirectDecision::Follow)
    }
}
