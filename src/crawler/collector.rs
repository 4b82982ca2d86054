//! The collector: admission control, fetch pipeline and callback dispatch
//!
//! A fetch goes through these stages:
//! 1. `scrape` normalizes the URL, merges headers and runs admission control
//!    (depth, request budget, URL policy, robots.txt, fingerprint dedup)
//! 2. The fetch runs inline, or on its own task in async mode, tracked by the
//!    collector's join-group
//! 3. Request callbacks run and may abort before any network I/O
//! 4. The backend performs the request, consulting the redirect interceptor on
//!    every hop and the headers callbacks before the body is read
//! 5. The outcome is dispatched to error callbacks, or to response, HTML, XML
//!    and scraped callbacks

use crate::config::{
    apply_env_overrides, validate_collector_config, CollectorConfig, LimitRuleConfig,
};
use crate::crawler::backend::{
    encode_form, multipart_body, HeadersReceived, HttpBackend, OutboundRequest, RequestBody,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::crawler::callbacks::{snapshot, Callbacks, SelectorCallback};
use crate::crawler::{
    CallbackId, Context, Debugger, Element, ElementCallback, ErrorCallback, Event, EventKind,
    Limiter, RedirectDecision, RedirectHandler, Request, RequestCallback, Response,
    ResponseCallback, RuleLimiter, WaitGroup,
};
use crate::robots::{robots_path, robots_url, ParsedRobots, RobotsCache};
use crate::storage::{Cookie, InMemoryStorage, Storage, StorageCookieJar};
use crate::url::{fingerprint, host_key, hostname, normalize_url, UrlPolicy};
use crate::{ConfigError, CrawlError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Source of fresh collector ids
static COLLECTOR_COUNTER: AtomicU32 = AtomicU32::new(0);

fn next_collector_id() -> u32 {
    COLLECTOR_COUNTER.fetch_add(1, Ordering::SeqCst) + 1
}

pub(super) struct CollectorInner {
    id: u32,
    pub(super) config: CollectorConfig,
    pub(super) policy: UrlPolicy,
    store: Arc<dyn Storage>,
    backend: Arc<HttpBackend>,
    robots: RobotsCache,
    callbacks: RwLock<Callbacks>,
    request_count: AtomicU32,
    response_count: AtomicU32,
    wait_group: WaitGroup,
    pub(super) redirect_handler: Option<RedirectHandler>,
    debugger: Option<Arc<dyn Debugger>>,
    default_headers: HeaderMap,
    user_agent: HeaderValue,
}

/// Crawl session: policy, shared state and callbacks
///
/// Cloning a `Collector` yields another handle to the same session. Use
/// [`Collector::fork`] for an independent collector sharing the store,
/// backend and robots cache.
#[derive(Clone)]
pub struct Collector {
    pub(super) inner: Arc<CollectorInner>,
}

/// Everything a fetch needs once admission control passed
struct FetchJob {
    url: Url,
    method: Method,
    depth: u32,
    body: Option<RequestBody>,
    body_copy: Option<Vec<u8>>,
    body_unseekable: bool,
    ctx: Option<Context>,
    headers: HeaderMap,
}

/// Builder for [`Collector`]
///
/// Environment overrides (`GLEANER_*`) are applied on top of the builder's
/// settings in `build`, unless disabled with `env_overrides(false)`.
pub struct CollectorBuilder {
    config: CollectorConfig,
    store: Option<Arc<dyn Storage>>,
    limiter: Option<Arc<dyn Limiter>>,
    limits: Vec<LimitRuleConfig>,
    redirect_handler: Option<RedirectHandler>,
    debugger: Option<Arc<dyn Debugger>>,
    timeout: Option<Duration>,
    env_overrides: bool,
}

impl Default for CollectorBuilder {
    fn default() -> Self {
        Self::from_config(CollectorConfig::default())
    }
}

impl CollectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a loaded configuration
    pub fn from_config(config: CollectorConfig) -> Self {
        Self {
            config,
            store: None,
            limiter: None,
            limits: Vec::new(),
            redirect_handler: None,
            debugger: None,
            timeout: None,
            env_overrides: true,
        }
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Adds a default header sent with requests that bring no header set
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn max_requests(mut self, max: u32) -> Self {
        self.config.max_requests = max;
        self
    }

    pub fn allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.config.allowed_domains = domains;
        self
    }

    pub fn disallowed_domains(mut self, domains: Vec<String>) -> Self {
        self.config.disallowed_domains = domains;
        self
    }

    pub fn url_filters(mut self, patterns: Vec<String>) -> Self {
        self.config.url_filters = patterns;
        self
    }

    pub fn disallowed_url_filters(mut self, patterns: Vec<String>) -> Self {
        self.config.disallowed_url_filters = patterns;
        self
    }

    pub fn allow_url_revisit(mut self, allow: bool) -> Self {
        self.config.allow_url_revisit = allow;
        self
    }

    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn ignore_robots_txt(mut self, ignore: bool) -> Self {
        self.config.ignore_robots_txt = ignore;
        self
    }

    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.config.async_mode = enabled;
        self
    }

    pub fn parse_http_error_response(mut self, enabled: bool) -> Self {
        self.config.parse_http_error_response = enabled;
        self
    }

    pub fn detect_charset(mut self, enabled: bool) -> Self {
        self.config.detect_charset = enabled;
        self
    }

    pub fn check_head(mut self, enabled: bool) -> Self {
        self.config.check_head = enabled;
        self
    }

    pub fn trace_http(mut self, enabled: bool) -> Self {
        self.config.trace_http = enabled;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn disable_cookies(mut self) -> Self {
        self.config.disable_cookies = true;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn id(mut self, id: u32) -> Self {
        self.config.id = Some(id);
        self
    }

    /// Fingerprint and cookie store; in-memory when not set
    pub fn storage(mut self, store: Arc<dyn Storage>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the rule-based limiter built from `limit` rules
    pub fn limiter(mut self, limiter: Arc<dyn Limiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn limit(mut self, rule: LimitRuleConfig) -> Self {
        self.limits.push(rule);
        self
    }

    pub fn redirect_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut OutboundRequest, &[Url]) -> Result<RedirectDecision> + Send + Sync + 'static,
    {
        self.redirect_handler = Some(Arc::new(handler));
        self
    }

    pub fn debugger(mut self, debugger: Arc<dyn Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    pub fn env_overrides(mut self, enabled: bool) -> Self {
        self.env_overrides = enabled;
        self
    }

    /// Validates the configuration and builds the collector
    pub fn build(self) -> Result<Collector> {
        let mut config = self.config;
        if self.env_overrides {
            apply_env_overrides(&mut config, std::env::vars());
        }
        validate_collector_config(&config)?;

        let policy = UrlPolicy::from_config(&config)?;
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| ConfigError::Validation(format!("Invalid user agent: {}", e)))?;
        let default_headers = header_map(&config.headers)?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        store.init()?;

        let jar = if config.disable_cookies {
            None
        } else {
            Some(Arc::new(StorageCookieJar::new(Arc::clone(&store))))
        };

        let limiter = match self.limiter {
            Some(limiter) => Some(limiter),
            None if self.limits.is_empty() => None,
            None => {
                let limiter: Arc<dyn Limiter> = Arc::new(RuleLimiter::from_config(&self.limits)?);
                Some(limiter)
            }
        };

        let timeout = self
            .timeout
            .or_else(|| config.request_timeout_secs.map(Duration::from_secs))
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let backend = HttpBackend::new(&config, timeout, jar, limiter)?;

        let redirect_handler = match self.redirect_handler {
            Some(handler) => Some(handler),
            None if !config.follow_redirects => {
                let handler: RedirectHandler =
                    Arc::new(|_: &mut OutboundRequest, _: &[Url]| Ok(RedirectDecision::UseLastResponse));
                Some(handler)
            }
            None => None,
        };

        let id = config.id.unwrap_or_else(next_collector_id);
        tracing::debug!("Built collector {}", id);

        Ok(Collector {
            inner: Arc::new(CollectorInner {
                id,
                config,
                policy,
                store,
                backend: Arc::new(backend),
                robots: RobotsCache::new(),
                callbacks: RwLock::new(Callbacks::default()),
                request_count: AtomicU32::new(0),
                response_count: AtomicU32::new(0),
                wait_group: WaitGroup::new(),
                redirect_handler,
                debugger: self.debugger,
                default_headers,
                user_agent,
            }),
        })
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConfigError::Validation(format!("Invalid header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConfigError::Validation(format!("Invalid value for {}: {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| CrawlError::InvalidSelector(format!("{}: {:?}", selector, e)))
}

fn status_text(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP status {}", status))
}

impl Collector {
    pub fn builder() -> CollectorBuilder {
        CollectorBuilder::new()
    }

    /// Collector with default settings and environment overrides
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn from_config(config: CollectorConfig) -> Result<Self> {
        CollectorBuilder::from_config(config).build()
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// Number of requests issued so far (aborted ones included)
    pub fn request_count(&self) -> u32 {
        self.inner.request_count.load(Ordering::SeqCst)
    }

    /// Number of responses dispatched to response callbacks
    pub fn response_count(&self) -> u32 {
        self.inner.response_count.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.store
    }

    pub fn robots_cache(&self) -> &RobotsCache {
        &self.inner.robots
    }

    pub(crate) fn wait_group(&self) -> &WaitGroup {
        &self.inner.wait_group
    }

    /// Visits a URL at depth 1
    ///
    /// With `check_head`, a HEAD request goes out first and its failure is
    /// returned without issuing the GET.
    pub async fn visit(&self, url: &str) -> Result<()> {
        if self.inner.config.check_head {
            self.scrape(url, Method::HEAD, 1, None, None, None, true)
                .await?;
        }
        self.scrape(url, Method::GET, 1, None, None, None, true)
            .await
    }

    /// Sends a HEAD request; HEAD requests are never deduplicated
    pub async fn head(&self, url: &str) -> Result<()> {
        self.scrape(url, Method::HEAD, 1, None, None, None, false)
            .await
    }

    /// Posts a URL-encoded form
    pub async fn post(&self, url: &str, form: &HashMap<String, String>) -> Result<()> {
        self.scrape(
            url,
            Method::POST,
            1,
            Some(RequestBody::form(form)),
            None,
            None,
            true,
        )
        .await
    }

    pub async fn post_raw(&self, url: &str, data: Vec<u8>) -> Result<()> {
        self.scrape(
            url,
            Method::POST,
            1,
            Some(RequestBody::Bytes(data)),
            None,
            None,
            true,
        )
        .await
    }

    /// Posts a `multipart/form-data` body
    ///
    /// Only `Content-Type` and `User-Agent` are sent; default headers are not.
    pub async fn post_multipart(&self, url: &str, data: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        let boundary = self.multipart_boundary();
        let content_type = HeaderValue::from_str(&format!(
            "multipart/form-data; boundary={}",
            boundary
        ))
        .map_err(|e| ConfigError::Validation(format!("Invalid multipart boundary: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, content_type);
        headers.insert(USER_AGENT, self.inner.user_agent.clone());

        self.scrape(
            url,
            Method::POST,
            1,
            Some(RequestBody::Bytes(multipart_body(&boundary, data))),
            None,
            Some(headers),
            true,
        )
        .await
    }

    fn multipart_boundary(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seed = format!("{}-{}-{}", self.id(), self.request_count(), nanos);
        hex::encode(Sha256::digest(seed.as_bytes()))[..30].to_string()
    }

    /// Issues a request with full control over method, body, context and headers
    ///
    /// `headers`, when given, replace the collector's default headers.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<RequestBody>,
        ctx: Option<Context>,
        headers: Option<HeaderMap>,
    ) -> Result<()> {
        self.scrape(url, method, 1, body, ctx, headers, true).await
    }

    /// Returns true if a GET to `url` was already admitted
    pub fn has_visited(&self, url: &str) -> Result<bool> {
        self.check_has_visited(url, None)
    }

    /// Returns true if the form was already posted to `url`
    pub fn has_posted(&self, url: &str, form: &HashMap<String, String>) -> Result<bool> {
        self.check_has_visited(url, Some(encode_form(form).as_bytes()))
    }

    fn check_has_visited(&self, url: &str, body: Option<&[u8]>) -> Result<bool> {
        let url = normalize_url(url)?;
        Ok(self.inner.store.is_visited(fingerprint(url.as_str(), body))?)
    }

    /// Waits until every fetch and tracked visit has completed
    pub async fn wait(&self) {
        self.inner.wait_group.wait().await;
    }

    fn callbacks(&self) -> RwLockReadGuard<'_, Callbacks> {
        self.inner
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks_mut(&self) -> RwLockWriteGuard<'_, Callbacks> {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a callback run before every request is sent
    pub fn on_request<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        let f: RequestCallback = Arc::new(f);
        let mut callbacks = self.callbacks_mut();
        let id = callbacks.next_id();
        callbacks.request.push((id, f));
        id
    }

    /// Registers a callback run when response headers arrive, before the body is read
    pub fn on_response_headers<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        let f: ResponseCallback = Arc::new(f);
        let mut callbacks = self.callbacks_mut();
        let id = callbacks.next_id();
        callbacks.response_headers.push((id, f));
        id
    }

    pub fn on_response<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        let f: ResponseCallback = Arc::new(f);
        let mut callbacks = self.callbacks_mut();
        let id = callbacks.next_id();
        callbacks.response.push((id, f));
        id
    }

    /// Registers a callback for every element matching a CSS selector in HTML responses
    ///
    /// Fails with `InvalidSelector` when the selector does not parse.
    pub fn on_html<F>(&self, selector: &str, f: F) -> Result<CallbackId>
    where
        F: Fn(&Element) + Send + Sync + 'static,
    {
        parse_selector(selector)?;
        let function: ElementCallback = Arc::new(f);
        let mut callbacks = self.callbacks_mut();
        let id = callbacks.next_id();
        callbacks.html.push((
            id,
            SelectorCallback {
                selector: selector.to_string(),
                function,
            },
        ));
        Ok(id)
    }

    /// Registers a callback for every element matching a CSS selector in XML
    /// or HTML responses
    pub fn on_xml<F>(&self, query: &str, f: F) -> Result<CallbackId>
    where
        F: Fn(&Element) + Send + Sync + 'static,
    {
        parse_selector(query)?;
        let function: ElementCallback = Arc::new(f);
        let mut callbacks = self.callbacks_mut();
        let id = callbacks.next_id();
        callbacks.xml.push((
            id,
            SelectorCallback {
                selector: query.to_string(),
                function,
            },
        ));
        Ok(id)
    }

    /// Registers a callback for failed requests and extraction errors
    pub fn on_error<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&Response, &CrawlError) + Send + Sync + 'static,
    {
        let f: ErrorCallback = Arc::new(f);
        let mut callbacks = self.callbacks_mut();
        let id = callbacks.next_id();
        callbacks.error.push((id, f));
        id
    }

    /// Registers a callback run last for every dispatched response
    pub fn on_scraped<F>(&self, f: F) -> CallbackId
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        let f: ResponseCallback = Arc::new(f);
        let mut callbacks = self.callbacks_mut();
        let id = callbacks.next_id();
        callbacks.scraped.push((id, f));
        id
    }

    /// Removes a callback; returns false if it was not registered
    pub fn detach(&self, id: CallbackId) -> bool {
        self.callbacks_mut().detach(id)
    }

    /// Removes the first HTML callback registered for `selector`
    pub fn on_html_detach(&self, selector: &str) -> bool {
        self.callbacks_mut().detach_html(selector)
    }

    /// Removes the first XML callback registered for `query`
    pub fn on_xml_detach(&self, query: &str) -> bool {
        self.callbacks_mut().detach_xml(query)
    }

    /// Stores cookies for the host of `url`
    pub fn set_cookies(&self, url: &str, cookies: &[Cookie]) -> Result<()> {
        let jar = self.inner.backend.jar().ok_or(CrawlError::NoCookieJar)?;
        let url = normalize_url(url)?;
        jar.store_cookies(&url, cookies.to_vec());
        Ok(())
    }

    /// Returns the cookies that would be sent to `url`
    pub fn cookies(&self, url: &str) -> Vec<Cookie> {
        match (self.inner.backend.jar(), normalize_url(url)) {
            (Some(jar), Ok(url)) => jar.cookies_for(&url),
            _ => Vec::new(),
        }
    }

    /// Creates an independent collector with the same configuration
    ///
    /// The fork gets a fresh id, zeroed counters, no callbacks and its own
    /// join-group. It shares the store, the HTTP backend (cookies, cache,
    /// limiter) and the robots cache with this collector.
    pub fn fork(&self) -> Collector {
        let inner = &self.inner;
        Collector {
            inner: Arc::new(CollectorInner {
                id: next_collector_id(),
                config: inner.config.clone(),
                policy: inner.policy.clone(),
                store: Arc::clone(&inner.store),
                backend: Arc::clone(&inner.backend),
                robots: inner.robots.clone(),
                callbacks: RwLock::new(Callbacks::default()),
                request_count: AtomicU32::new(0),
                response_count: AtomicU32::new(0),
                wait_group: WaitGroup::new(),
                redirect_handler: inner.redirect_handler.clone(),
                debugger: inner.debugger.clone(),
                default_headers: inner.default_headers.clone(),
                user_agent: inner.user_agent.clone(),
            }),
        }
    }

    pub(crate) fn new_request(
        &self,
        url: Url,
        method: Method,
        depth: u32,
        ctx: Option<Context>,
    ) -> Request {
        Request {
            url,
            method,
            headers: HeaderMap::new(),
            depth,
            ctx: ctx.unwrap_or_default(),
            id: 0,
            proxy_url: self.inner.backend.proxy_url().map(str::to_string),
            response_character_encoding: None,
            body: None,
            body_unseekable: false,
            abort: Default::default(),
            base_url: Default::default(),
            collector: self.clone(),
        }
    }

    /// Admits and performs one request
    ///
    /// In async mode the fetch is spawned and only admission errors are
    /// returned; fetch errors reach the error callbacks.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn scrape(
        &self,
        url: &str,
        method: Method,
        depth: u32,
        body: Option<RequestBody>,
        ctx: Option<Context>,
        headers: Option<HeaderMap>,
        check_revisit: bool,
    ) -> Result<()> {
        let parsed = normalize_url(url)?;

        let mut headers = headers.unwrap_or_else(|| self.inner.default_headers.clone());
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.inner.user_agent.clone());
        }

        let body_unseekable = matches!(body, Some(RequestBody::Stream(_)));
        if body_unseekable && check_revisit && !self.inner.config.allow_url_revisit {
            return Err(CrawlError::RetryBodyUnseekable);
        }
        let body_copy = body
            .as_ref()
            .and_then(RequestBody::as_bytes)
            .map(<[u8]>::to_vec);

        if let Err(e) = self
            .request_check(&parsed, &method, body_copy.as_deref(), depth, check_revisit)
            .await
        {
            tracing::debug!("Rejected {} {}: {}", method, parsed, e);
            return Err(e);
        }

        let job = FetchJob {
            url: parsed,
            method,
            depth,
            body,
            body_copy,
            body_unseekable,
            ctx,
            headers,
        };

        let guard = self.inner.wait_group.add();
        if self.inner.config.async_mode {
            let collector = self.clone();
            tokio::spawn(async move {
                let _guard = guard;
                if let Err(e) = collector.fetch(job).await {
                    tracing::debug!("Async fetch failed: {}", e);
                }
            });
            return Ok(());
        }

        let _guard = guard;
        self.fetch(job).await
    }

    async fn request_check(
        &self,
        url: &Url,
        method: &Method,
        body: Option<&[u8]>,
        depth: u32,
        check_revisit: bool,
    ) -> Result<()> {
        let config = &self.inner.config;

        if config.max_depth > 0 && depth > config.max_depth {
            return Err(CrawlError::MaxDepth);
        }
        if config.max_requests > 0 && self.request_count() >= config.max_requests {
            return Err(CrawlError::MaxRequests);
        }

        self.inner.policy.check(url.as_str(), &hostname(url))?;

        if *method != Method::HEAD && !config.ignore_robots_txt {
            self.check_robots(url).await?;
        }

        if check_revisit && !config.allow_url_revisit {
            // Bodiless non-GET requests cannot be fingerprinted reliably
            if *method != Method::GET && body.is_none() {
                return Ok(());
            }
            self.check_and_record(url, body)?;
        }

        Ok(())
    }

    /// Fails with `AlreadyVisited` if the fingerprint is known, records it otherwise
    ///
    /// The lookup and the insert are separate store calls; two concurrent
    /// requests for the same fingerprint may both pass.
    pub(crate) fn check_and_record(&self, url: &Url, body: Option<&[u8]>) -> Result<()> {
        let hash = fingerprint(url.as_str(), body);
        if self.inner.store.is_visited(hash)? {
            return Err(CrawlError::AlreadyVisited {
                destination: url.clone(),
            });
        }
        self.inner.store.visited(hash)?;
        Ok(())
    }

    async fn check_robots(&self, url: &Url) -> Result<()> {
        let host = host_key(url);

        let robots = match self.inner.robots.get(&host) {
            Some(robots) => robots,
            None => {
                let robots = match robots_url(url) {
                    Some(location) => {
                        let mut headers = HeaderMap::new();
                        headers.insert(USER_AGENT, self.inner.user_agent.clone());
                        let (status, body) =
                            self.inner.backend.fetch_robots(location, headers).await?;
                        tracing::debug!("Fetched robots.txt for {} ({})", host, status);
                        ParsedRobots::from_response(status, &body)
                    }
                    None => ParsedRobots::allow_all(),
                };
                self.inner.robots.insert(&host, robots.clone());
                robots
            }
        };

        if robots.is_allowed(&robots_path(url), &self.inner.config.user_agent) {
            Ok(())
        } else {
            Err(CrawlError::RobotsTxtBlocked)
        }
    }

    async fn fetch(&self, job: FetchJob) -> Result<()> {
        let ctx = job.ctx.unwrap_or_default();
        let mut request = self.new_request(job.url, job.method, job.depth, Some(ctx.clone()));
        request.id = self.inner.request_count.fetch_add(1, Ordering::SeqCst) + 1;
        request.headers = job.headers;
        request.body = job.body_copy;
        request.body_unseekable = job.body_unseekable;

        if !request.headers.contains_key(ACCEPT) {
            request
                .headers
                .insert(ACCEPT, HeaderValue::from_static("*/*"));
        }

        self.handle_on_request(&mut request);

        if request.is_aborted() {
            tracing::debug!("Request {} to {} aborted", request.id, request.url);
            return Ok(());
        }

        if request.method == Method::POST && !request.headers.contains_key(CONTENT_TYPE) {
            request.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
        }

        let request = Arc::new(request);
        let mut outbound = OutboundRequest::new(
            request.method.clone(),
            request.url.clone(),
            request.headers.clone(),
        );
        outbound.body = job.body;

        let mut final_request = Arc::clone(&request);
        let fetched = self
            .inner
            .backend
            .fetch(
                outbound,
                &mut |seen: HeadersReceived<'_>| {
                    if *seen.url != final_request.url {
                        final_request = Arc::new(
                            final_request.redirected(seen.url.clone(), seen.request_headers.clone()),
                        );
                    }
                    let response = Response {
                        status: seen.status,
                        headers: seen.headers.clone(),
                        body: Vec::new(),
                        ctx: ctx.clone(),
                        request: Arc::clone(&final_request),
                        trace: None,
                    };
                    self.handle_on_response_headers(&response);
                    !final_request.is_aborted()
                },
                &mut |next: &mut OutboundRequest, via: &[Url]| self.check_redirect(next, via),
            )
            .await;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                let response = Response::shell(final_request);
                return Err(self.handle_on_error(&response, err));
            }
        };

        let mut response = Response {
            status: fetched.status,
            headers: fetched.headers,
            body: fetched.body,
            ctx,
            request: final_request,
            trace: fetched.trace,
        };

        if response.status >= 203 && !self.inner.config.parse_http_error_response {
            let err = CrawlError::HttpStatus {
                status: response.status,
                reason: status_text(response.status),
            };
            return Err(self.handle_on_error(&response, err));
        }

        self.inner.response_count.fetch_add(1, Ordering::SeqCst);
        response.fix_charset(self.inner.config.detect_charset);

        self.handle_on_response(&response);

        let html = self
            .handle_on_html(&response)
            .map_err(|e| self.handle_on_error(&response, e));
        let xml = self
            .handle_on_xml(&response)
            .map_err(|e| self.handle_on_error(&response, e));

        self.handle_on_scraped(&response);

        html.and(xml)
    }

    fn emit(&self, event: impl FnOnce() -> Event) {
        if let Some(debugger) = &self.inner.debugger {
            debugger.event(&event());
        }
    }

    fn handle_on_request(&self, request: &mut Request) {
        self.emit(|| {
            Event::new(EventKind::Request, self.id(), request.id).with("url", request.url.as_str())
        });

        let callbacks = snapshot(&self.callbacks().request);
        for f in callbacks {
            f(request);
        }
    }

    fn handle_on_response_headers(&self, response: &Response) {
        self.emit(|| {
            Event::new(EventKind::ResponseHeaders, self.id(), response.request.id)
                .with("url", response.request.url.as_str())
                .with("status", status_text(response.status))
        });

        let callbacks = snapshot(&self.callbacks().response_headers);
        for f in callbacks {
            f(response);
        }
    }

    fn handle_on_response(&self, response: &Response) {
        self.emit(|| {
            Event::new(EventKind::Response, self.id(), response.request.id)
                .with("url", response.request.url.as_str())
                .with("status", status_text(response.status))
        });

        let callbacks = snapshot(&self.callbacks().response);
        for f in callbacks {
            f(response);
        }
    }

    fn handle_on_html(&self, response: &Response) -> Result<()> {
        let callbacks = snapshot(&self.callbacks().html);
        if callbacks.is_empty() {
            return Ok(());
        }

        let media_type = response.media_type();
        if media_type != "text/html" && media_type != "application/xhtml+xml" {
            return Ok(());
        }

        let document = Html::parse_document(&response.text());
        apply_base_href(&document, &response.request);

        for callback in callbacks {
            let selector = parse_selector(&callback.selector)?;
            for (index, node) in document.select(&selector).enumerate() {
                self.emit(|| {
                    Event::new(EventKind::Html, self.id(), response.request.id)
                        .with("selector", callback.selector.as_str())
                        .with("url", response.request.url.as_str())
                });
                tracing::trace!("HTML match {} #{} on {}", callback.selector, index, response.request.url);
                (callback.function)(&Element::from_node(node, index, &response.request));
            }
        }

        Ok(())
    }

    fn handle_on_xml(&self, response: &Response) -> Result<()> {
        let callbacks = snapshot(&self.callbacks().xml);
        if callbacks.is_empty() {
            return Ok(());
        }

        let content_type = response.content_type().unwrap_or_default().to_ascii_lowercase();
        let path = response.request.url.path().to_ascii_lowercase();
        let is_html = content_type.contains("html");
        let is_xml_file = path.ends_with(".xml") || path.ends_with(".xml.gz");
        if !is_html && !content_type.contains("xml") && !is_xml_file {
            return Ok(());
        }

        let document = if is_html {
            let document = Html::parse_document(&response.text());
            apply_base_href(&document, &response.request);
            document
        } else {
            let text = std::str::from_utf8(&response.body).map_err(|e| CrawlError::Extraction {
                url: response.request.url.to_string(),
                message: format!("XML body is not valid UTF-8: {}", e),
            })?;
            // The HTML tree builder keeps unknown tags, so CSS type selectors match XML names
            Html::parse_document(text)
        };

        for callback in callbacks {
            let selector = parse_selector(&callback.selector)?;
            for (index, node) in document.select(&selector).enumerate() {
                self.emit(|| {
                    Event::new(EventKind::Xml, self.id(), response.request.id)
                        .with("selector", callback.selector.as_str())
                        .with("url", response.request.url.as_str())
                });
                (callback.function)(&Element::from_node(node, index, &response.request));
            }
        }

        Ok(())
    }

    /// Runs the error callbacks and hands the error back
    fn handle_on_error(&self, response: &Response, err: CrawlError) -> CrawlError {
        self.emit(|| {
            Event::new(EventKind::Error, self.id(), response.request.id)
                .with("url", response.request.url.as_str())
                .with("status", status_text(response.status))
        });
        tracing::debug!("Request to {} failed: {}", response.request.url, err);

        let callbacks = snapshot(&self.callbacks().error);
        for f in callbacks {
            f(response, &err);
        }
        err
    }

    fn handle_on_scraped(&self, response: &Response) {
        self.emit(|| {
            Event::new(EventKind::Scraped, self.id(), response.request.id)
                .with("url", response.request.url.as_str())
        });

        let callbacks = snapshot(&self.callbacks().scraped);
        for f in callbacks {
            f(response);
        }
    }
}

/// Records `<base href>` as the request's base URL
fn apply_base_href(document: &Html, request: &Request) {
    let Ok(selector) = Selector::parse("base[href]") else {
        return;
    };
    if let Some(href) = document
        .select(&selector)
        .next()
        .and_then(|node| node.value().attr("href"))
    {
        if let Ok(base) = request.url.join(href) {
            request.set_base_url(base);
        }
    }
}

impl fmt::Display for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callbacks = self.callbacks();
        write!(
            f,
            "Requests made: {} ({} responses) | Callbacks: OnRequest: {}, OnHTML: {}, OnResponse: {}, OnError: {}",
            self.request_count(),
            self.response_count(),
            callbacks.request.len(),
            callbacks.html.len(),
            callbacks.response.len(),
            callbacks.error.len(),
        )
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("id", &self.inner.id)
            .field("requests", &self.request_count())
            .field("responses", &self.response_count())
            .finish()
    }
}
