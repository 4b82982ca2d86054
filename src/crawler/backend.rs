//! HTTP transport for the collector
//!
//! This module performs the network side of a fetch:
//! - Building the reqwest client (timeouts, proxy, cookie jar)
//! - Following redirects one hop at a time, asking the redirect interceptor
//!   before every hop
//! - Invoking the headers hook before the body is read
//! - Truncating bodies at the configured size
//! - Caching GET responses on disk
//! - Waiting on the per-host limiter

use crate::config::CollectorConfig;
use crate::crawler::limiter::Limiter;
use crate::crawler::redirect::RedirectDecision;
use crate::storage::StorageCookieJar;
use crate::url::host_key;
use crate::{CrawlError, Result};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_LENGTH,
    CONTENT_TYPE, LOCATION, REFERER, TRANSFER_ENCODING,
};
use reqwest::{redirect::Policy, Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Timeout applied when the configuration sets none
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of an outgoing request
pub enum RequestBody {
    /// In-memory body; can be fingerprinted, resent on redirects and retried
    Bytes(Vec<u8>),
    /// One-shot streaming body
    Stream(reqwest::Body),
}

impl RequestBody {
    /// URL-encoded form body with keys in sorted order
    pub fn form(data: &HashMap<String, String>) -> Self {
        RequestBody::Bytes(encode_form(data).into_bytes())
    }

    pub fn stream(body: impl Into<reqwest::Body>) -> Self {
        RequestBody::Stream(body.into())
    }

    pub fn is_reusable(&self) -> bool {
        matches!(self, RequestBody::Bytes(_))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RequestBody::Bytes(bytes) => Some(bytes),
            RequestBody::Stream(_) => None,
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Bytes(text.into_bytes())
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Encodes form fields as `application/x-www-form-urlencoded`, sorted by key
pub fn encode_form(data: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&String, &String> = data.iter().collect();
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish()
}

/// Builds a `multipart/form-data` body with one part per field
pub fn multipart_body(boundary: &str, data: &BTreeMap<String, Vec<u8>>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, content) in data {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n", name).as_bytes(),
        );
        body.extend_from_slice(format!("Content-Length: {}\r\n\r\n", content.len()).as_bytes());
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

/// One hop of an outgoing request
///
/// Redirect handlers receive the next hop mutably and may rewrite its
/// headers.
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub(crate) body: Option<RequestBody>,
}

impl OutboundRequest {
    pub fn new(method: Method, url: Url, headers: HeaderMap) -> Self {
        Self {
            method,
            url,
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("body", &self.body)
            .finish()
    }
}

/// Timing of one fetch, measured from the first hop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpTrace {
    /// Until the final response's headers arrived
    pub first_byte: Duration,
    /// Until the body was read
    pub total: Duration,
}

/// What the headers hook sees
pub(crate) struct HeadersReceived<'a> {
    /// URL of the hop that produced the response
    pub url: &'a Url,
    pub request_headers: &'a HeaderMap,
    pub status: u16,
    pub headers: &'a HeaderMap,
}

pub(crate) type HeadersHook<'h> = dyn FnMut(HeadersReceived<'_>) -> bool + Send + 'h;
pub(crate) type RedirectHook<'h> =
    dyn FnMut(&mut OutboundRequest, &[Url]) -> Result<RedirectDecision> + Send + 'h;

/// Final response of a fetch
#[derive(Debug, Clone)]
pub(crate) struct FetchedResponse {
    pub url: Url,
    pub request_headers: HeaderMap,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub trace: Option<HttpTrace>,
}

/// On-disk representation of a cached response
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body_hex: String,
}

impl CacheEntry {
    fn from_response(response: &FetchedResponse) -> Self {
        Self {
            url: response.url.to_string(),
            status: response.status,
            headers: response
                .headers
                .iter()
                .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
                .collect(),
            body_hex: hex::encode(&response.body),
        }
    }

    fn into_response(self, request_headers: HeaderMap) -> Option<FetchedResponse> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            headers.append(name, value);
        }
        Some(FetchedResponse {
            url: Url::parse(&self.url).ok()?,
            request_headers,
            status: self.status,
            headers,
            body: hex::decode(&self.body_hex).ok()?,
            trace: None,
        })
    }
}

/// HTTP backend shared by a collector and its forks
pub struct HttpBackend {
    client: Client,
    jar: Option<Arc<StorageCookieJar>>,
    limiter: Option<Arc<dyn Limiter>>,
    max_body_size: usize,
    cache_dir: Option<PathBuf>,
    trace: bool,
    proxy_url: Option<String>,
}

impl HttpBackend {
    /// Builds the backend and its HTTP client
    ///
    /// # Arguments
    ///
    /// * `config` - Collector configuration (body size, cache, proxy, tracing)
    /// * `timeout` - Whole-request timeout
    /// * `jar` - Cookie jar; `None` disables cookies
    /// * `limiter` - Per-host limiter consulted before every request
    pub fn new(
        config: &CollectorConfig,
        timeout: Duration,
        jar: Option<Arc<StorageCookieJar>>,
        limiter: Option<Arc<dyn Limiter>>,
    ) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .redirect(Policy::none()) // Redirects are followed hop by hop below
            .gzip(true)
            .brotli(true);

        if let Some(proxy) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        if let Some(jar) = &jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        Ok(Self {
            client: builder.build()?,
            jar,
            limiter,
            max_body_size: config.max_body_size,
            cache_dir: config.cache_dir.as_ref().map(PathBuf::from),
            trace: config.trace_http,
            proxy_url: config.proxy_url.clone(),
        })
    }

    pub fn jar(&self) -> Option<&Arc<StorageCookieJar>> {
        self.jar.as_ref()
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    /// Fetches a request, going through the cache and the limiter
    pub(crate) async fn fetch(
        &self,
        request: OutboundRequest,
        on_headers: &mut HeadersHook<'_>,
        on_redirect: &mut RedirectHook<'_>,
    ) -> Result<FetchedResponse> {
        let cache_path = self.cache_path(&request);

        if let Some(path) = &cache_path {
            if let Some(cached) = read_cache_entry(path, &request.headers).await {
                if cached.status < 500 {
                    tracing::trace!("Cache hit for {}", request.url);
                    let proceed = on_headers(HeadersReceived {
                        url: &cached.url,
                        request_headers: &cached.request_headers,
                        status: cached.status,
                        headers: &cached.headers,
                    });
                    if !proceed {
                        return Err(CrawlError::AbortedAfterHeaders);
                    }
                    return Ok(cached);
                }
            }
        }

        let host = host_key(&request.url);
        let permit = match &self.limiter {
            Some(limiter) => Some(limiter.acquire(&host).await),
            None => None,
        };

        let result = self.execute(request, on_headers, on_redirect).await;

        if let Some(permit) = permit {
            permit.release().await;
        }
        let response = result?;

        if let Some(path) = &cache_path {
            if response.status < 500 {
                if let Err(e) = write_cache_entry(path, &response).await {
                    tracing::warn!("Failed to cache {}: {}", response.url, e);
                }
            }
        }

        Ok(response)
    }

    /// Fetches `/robots.txt`, following up to ten redirects
    ///
    /// Returns the final status and body.
    pub(crate) async fn fetch_robots(&self, url: Url, headers: HeaderMap) -> Result<(u16, String)> {
        let request = OutboundRequest::new(Method::GET, url, headers);
        let response = self
            .execute(
                request,
                &mut |_: HeadersReceived<'_>| true,
                &mut |_: &mut OutboundRequest, via: &[Url]| {
                    Ok(if via.len() >= crate::crawler::MAX_REDIRECTS {
                        RedirectDecision::UseLastResponse
                    } else {
                        RedirectDecision::Follow
                    })
                },
            )
            .await?;

        Ok((
            response.status,
            String::from_utf8_lossy(&response.body).into_owned(),
        ))
    }

    /// Sends a request and follows its redirect chain
    async fn execute(
        &self,
        mut outbound: OutboundRequest,
        on_headers: &mut HeadersHook<'_>,
        on_redirect: &mut RedirectHook<'_>,
    ) -> Result<FetchedResponse> {
        let started = Instant::now();
        let mut via: Vec<Url> = Vec::new();

        loop {
            let stream_sent = matches!(outbound.body, Some(RequestBody::Stream(_)));
            let mut builder = self
                .client
                .request(outbound.method.clone(), outbound.url.clone())
                .headers(outbound.headers.clone());
            if let Some(body) = take_send_body(&mut outbound.body) {
                builder = builder.body(body);
            }

            let response = builder.send().await?;
            let status = response.status();

            if let Some(mut next) = redirect_target(&outbound, &response, stream_sent) {
                via.push(outbound.url.clone());
                match on_redirect(&mut next, &via)? {
                    RedirectDecision::Follow => {
                        tracing::debug!(
                            "Following {} redirect {} -> {}",
                            status.as_u16(),
                            outbound.url,
                            next.url
                        );
                        outbound = next;
                        continue;
                    }
                    RedirectDecision::UseLastResponse => {
                        tracing::debug!("Stopping at {} redirect from {}", status, outbound.url);
                    }
                }
            }

            let first_byte = started.elapsed();
            let headers = response.headers().clone();
            let proceed = on_headers(HeadersReceived {
                url: &outbound.url,
                request_headers: &outbound.headers,
                status: status.as_u16(),
                headers: &headers,
            });
            if !proceed {
                return Err(CrawlError::AbortedAfterHeaders);
            }

            let body = read_body(response, self.max_body_size).await?;
            let trace = self.trace.then(|| HttpTrace {
                first_byte,
                total: started.elapsed(),
            });

            return Ok(FetchedResponse {
                url: outbound.url,
                request_headers: outbound.headers,
                status: status.as_u16(),
                headers,
                body,
                trace,
            });
        }
    }

    fn cache_path(&self, request: &OutboundRequest) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        if request.method != Method::GET {
            return None;
        }
        let no_cache = request
            .headers
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().eq_ignore_ascii_case("no-cache"))
            .unwrap_or(false);
        if no_cache {
            return None;
        }

        let digest = hex::encode(Sha256::digest(request.url.as_str().as_bytes()));
        Some(dir.join(&digest[..2]).join(&digest))
    }
}

// Bytes bodies stay in place so a 307/308 hop can resend them
fn take_send_body(body: &mut Option<RequestBody>) -> Option<reqwest::Body> {
    match body.take()? {
        RequestBody::Bytes(bytes) => {
            let sent = reqwest::Body::from(bytes.clone());
            *body = Some(RequestBody::Bytes(bytes));
            Some(sent)
        }
        RequestBody::Stream(stream) => Some(stream),
    }
}

/// Builds the next hop for a redirect response
///
/// Returns `None` when the response is not a followable redirect: not a
/// 301/302/303/307/308, no usable `Location`, or a 307/308 whose streaming
/// body cannot be sent again.
fn redirect_target(
    current: &OutboundRequest,
    response: &reqwest::Response,
    stream_sent: bool,
) -> Option<OutboundRequest> {
    let status = response.status();
    let keep_method = match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => false,
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => true,
        _ => return None,
    };

    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    let url = current.url.join(location).ok()?;
    let mut headers = current.headers.clone();

    let (method, body) = if keep_method {
        if stream_sent {
            return None;
        }
        let body = current
            .body
            .as_ref()
            .and_then(RequestBody::as_bytes)
            .map(|b| RequestBody::Bytes(b.to_vec()));
        (current.method.clone(), body)
    } else {
        for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_ENCODING, TRANSFER_ENCODING] {
            headers.remove(name);
        }
        let method = if current.method == Method::HEAD {
            Method::HEAD
        } else {
            Method::GET
        };
        (method, None)
    };

    // No referer when leaving https for plain http
    if current.url.scheme() == "https" && url.scheme() != "https" {
        headers.remove(REFERER);
    } else if let Ok(value) = HeaderValue::from_str(&referer(&current.url)) {
        headers.insert(REFERER, value);
    }

    Some(OutboundRequest {
        method,
        url,
        headers,
        body,
    })
}

fn referer(url: &Url) -> String {
    let mut referer = url.clone();
    referer.set_fragment(None);
    let _ = referer.set_username("");
    let _ = referer.set_password(None);
    referer.to_string()
}

/// Reads a response body, keeping at most `limit` bytes (0 = unlimited)
async fn read_body(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if limit > 0 && body.len() + chunk.len() >= limit {
            let remaining = limit - body.len();
            body.extend_from_slice(&chunk[..remaining]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

async fn read_cache_entry(path: &Path, request_headers: &HeaderMap) -> Option<FetchedResponse> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice::<CacheEntry>(&bytes) {
        Ok(entry) => entry.into_response(request_headers.clone()),
        Err(e) => {
            tracing::debug!("Ignoring unreadable cache entry {}: {}", path.display(), e);
            None
        }
    }
}

async fn write_cache_entry(path: &Path, response: &FetchedResponse) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let encoded = serde_json::to_vec(&CacheEntry::from_response(response))
        .map_err(|e| CrawlError::Cache(e.to_string()))?;

    // Write then rename so readers never see a partial entry
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, encoded).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
