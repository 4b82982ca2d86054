//! A fetch about to be issued or in flight

use crate::crawler::{Collector, Context, RequestBody};
use crate::{CrawlError, Result, UrlError};
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use url::Url;

/// One request issued by a collector
///
/// Request callbacks receive it mutably and may change headers, set the
/// response encoding, or `abort` it. From then on it is shared read-only
/// with the response, element and error callbacks.
pub struct Request {
    /// Target URL; after redirects, the URL of the last hop
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    /// 1 for seeds, parent depth + 1 for discovered links
    pub depth: u32,
    pub ctx: Context,
    /// Unique within the collector, increasing in issue order
    pub id: u32,
    /// Proxy the request was sent through
    pub proxy_url: Option<String>,
    /// Forces the body encoding used by charset normalization
    pub response_character_encoding: Option<String>,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) body_unseekable: bool,
    pub(crate) abort: Arc<AtomicBool>,
    pub(crate) base_url: OnceLock<Url>,
    pub(crate) collector: Collector,
}

impl Request {
    /// Returns the request body, if it was sent from a buffer
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Cancels the request
    ///
    /// From a request callback this prevents any network I/O; from a
    /// response-headers callback it stops the transport before the body is
    /// read.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Id of the collector that issued the request
    pub fn collector_id(&self) -> u32 {
        self.collector.id()
    }

    /// URL relative links resolve against: `<base href>` when the page had
    /// one, the request URL otherwise
    pub fn base_url(&self) -> &Url {
        self.base_url.get().unwrap_or(&self.url)
    }

    pub(crate) fn set_base_url(&self, base: Url) {
        let _ = self.base_url.set(base);
    }

    /// Resolves a link found in the response into an absolute URL
    ///
    /// Returns `None` for fragment-only links and links that do not resolve.
    /// The fragment of the resolved URL is dropped.
    pub fn absolute_url(&self, link: &str) -> Option<String> {
        let link = link.trim();
        if link.starts_with('#') {
            return None;
        }

        let mut absolute = self.base_url().join(link).ok()?;
        absolute.set_fragment(None);
        Some(absolute.to_string())
    }

    fn resolve(&self, link: &str) -> Result<String> {
        self.absolute_url(link)
            .ok_or_else(|| CrawlError::MalformedUrl(UrlError::Parse(link.to_string())))
    }

    /// Visits a link one level deeper, sharing this request's context
    pub async fn visit(&self, link: &str) -> Result<()> {
        let url = self.resolve(link)?;
        self.collector
            .scrape(
                &url,
                Method::GET,
                self.depth + 1,
                None,
                Some(self.ctx.clone()),
                None,
                true,
            )
            .await
    }

    /// Visits a link on a background task tracked by the collector's join-group
    ///
    /// Usable from synchronous callbacks; `Collector::wait` covers the task.
    /// Rejections are logged, fetch errors reach the error callbacks.
    pub fn spawn_visit(&self, link: &str) {
        let url = match self.absolute_url(link) {
            Some(url) => url,
            None => {
                tracing::debug!("Not visiting unresolvable link {:?}", link);
                return;
            }
        };

        let collector = self.collector.clone();
        let guard = collector.wait_group().add();
        let ctx = self.ctx.clone();
        let depth = self.depth + 1;

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = collector
                .scrape(&url, Method::GET, depth, None, Some(ctx), None, true)
                .await
            {
                tracing::debug!("Visit of {} ended with: {}", url, e);
            }
        });
    }

    /// Posts a form to a link one level deeper
    pub async fn post(&self, link: &str, form: &HashMap<String, String>) -> Result<()> {
        let url = self.resolve(link)?;
        self.collector
            .scrape(
                &url,
                Method::POST,
                self.depth + 1,
                Some(RequestBody::form(form)),
                Some(self.ctx.clone()),
                None,
                true,
            )
            .await
    }

    /// Posts raw bytes to a link one level deeper
    pub async fn post_raw(&self, link: &str, data: Vec<u8>) -> Result<()> {
        let url = self.resolve(link)?;
        self.collector
            .scrape(
                &url,
                Method::POST,
                self.depth + 1,
                Some(RequestBody::Bytes(data)),
                Some(self.ctx.clone()),
                None,
                true,
            )
            .await
    }

    /// Issues the same request again, bypassing the revisit check
    ///
    /// Fails with `RetryBodyUnseekable` when the body was a one-shot stream.
    pub async fn retry(&self) -> Result<()> {
        if self.body_unseekable {
            return Err(CrawlError::RetryBodyUnseekable);
        }
        self.collector
            .scrape(
                self.url.as_str(),
                self.method.clone(),
                self.depth,
                self.body.clone().map(RequestBody::Bytes),
                Some(self.ctx.clone()),
                Some(self.headers.clone()),
                false,
            )
            .await
    }

    /// Copy of this request pointing at a redirect target
    ///
    /// The copy shares the abort flag, so aborting either cancels the fetch.
    pub(crate) fn redirected(&self, url: Url, headers: HeaderMap) -> Request {
        Request {
            url,
            method: self.method.clone(),
            headers,
            depth: self.depth,
            ctx: self.ctx.clone(),
            id: self.id,
            proxy_url: self.proxy_url.clone(),
            response_character_encoding: self.response_character_encoding.clone(),
            body: self.body.clone(),
            body_unseekable: self.body_unseekable,
            abort: Arc::clone(&self.abort),
            base_url: OnceLock::new(),
            collector: self.collector.clone(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("depth", &self.depth)
            .field("collector", &self.collector.id())
            .finish()
    }
}
