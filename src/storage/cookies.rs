//! Cookie jar backed by a `Storage`
//!
//! Cookies are kept per host as `Set-Cookie` style lines joined by newlines.
//! Incoming cookies are merged by name; expired cookies and secure cookies
//! requested over plain http are filtered out when reading.

use crate::storage::traits::Storage;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use reqwest::header::HeaderValue;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;

const COOKIE_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
const MAX_AGE_CAP_SECS: i64 = 100 * 365 * 24 * 3600;

/// A single HTTP cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    /// Absolute expiry; `Max-Age` is resolved against the parse time
    pub expires: Option<DateTime<Utc>>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            expires: None,
            secure: false,
            http_only: false,
        }
    }

    /// Parses one `Set-Cookie` header value
    ///
    /// Returns `None` for lines without a `name=value` pair.
    pub fn parse(header: &str) -> Option<Self> {
        Self::parse_at(header, Utc::now())
    }

    fn parse_at(header: &str, now: DateTime<Utc>) -> Option<Self> {
        let mut parts = header.split(';').map(str::trim);
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie::new(name, value.trim().trim_matches('"'));
        let mut max_age: Option<i64> = None;

        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (attr, ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "path" if !val.is_empty() => cookie.path = Some(val.to_string()),
                "domain" if !val.is_empty() => {
                    cookie.domain = Some(val.trim_start_matches('.').to_ascii_lowercase())
                }
                "expires" => cookie.expires = parse_cookie_date(val),
                "max-age" => max_age = val.parse().ok(),
                _ => {}
            }
        }

        // Max-Age wins over Expires
        if let Some(seconds) = max_age {
            cookie.expires = if seconds <= 0 {
                Utc.timestamp_opt(0, 0).single()
            } else {
                Some(now + Duration::seconds(seconds.min(MAX_AGE_CAP_SECS)))
            };
        }

        Some(cookie)
    }

    /// Returns true if the cookie has an expiry in the past
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|e| e <= now).unwrap_or(false)
    }

    /// Formats the cookie as a `Set-Cookie` line
    pub fn to_set_cookie(&self) -> String {
        let mut line = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            line.push_str("; Path=");
            line.push_str(path);
        }
        if let Some(domain) = &self.domain {
            line.push_str("; Domain=");
            line.push_str(domain);
        }
        if let Some(expires) = &self.expires {
            line.push_str("; Expires=");
            line.push_str(&expires.format(COOKIE_DATE_FORMAT).to_string());
        }
        if self.secure {
            line.push_str("; Secure");
        }
        if self.http_only {
            line.push_str("; HttpOnly");
        }
        line
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        COOKIE_DATE_FORMAT,
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Parses a newline separated list of `Set-Cookie` lines
pub fn parse_cookie_lines(serialized: &str) -> Vec<Cookie> {
    serialized
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(Cookie::parse)
        .collect()
}

/// Serializes cookies as newline separated `Set-Cookie` lines
pub fn serialize_cookies(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(Cookie::to_set_cookie)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cookie jar persisting through a `Storage`
///
/// Plugged into the HTTP client through `reqwest::cookie::CookieStore`, and
/// used directly by `Collector::cookies`/`Collector::set_cookies`. Clones
/// share the write lock, so concurrent responses for one host never drop
/// each other's cookies.
#[derive(Clone)]
pub struct StorageCookieJar {
    store: Arc<dyn Storage>,
    write_lock: Arc<Mutex<()>>,
}

impl StorageCookieJar {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the cookies that would be sent to `url`
    pub fn cookies_for(&self, url: &Url) -> Vec<Cookie> {
        let now = Utc::now();
        let https = url.scheme() == "https";
        parse_cookie_lines(&self.store.cookies(url))
            .into_iter()
            .filter(|c| !c.is_expired(now))
            .filter(|c| https || !c.secure)
            .collect()
    }

    /// Merges `cookies` into the stored cookies of the host of `url`
    ///
    /// A new cookie replaces a stored cookie of the same name.
    pub fn store_cookies(&self, url: &Url, cookies: Vec<Cookie>) {
        if cookies.is_empty() {
            return;
        }
        // Held across read, merge and write
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut merged = parse_cookie_lines(&self.store.cookies(url));
        for cookie in cookies {
            match merged.iter_mut().find(|c| c.name == cookie.name) {
                Some(existing) => *existing = cookie,
                None => merged.push(cookie),
            }
        }
        self.store.set_cookies(url, &serialize_cookies(&merged));
    }
}

impl reqwest::cookie::CookieStore for StorageCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let cookies: Vec<Cookie> = cookie_headers
            .filter_map(|value| value.to_str().ok())
            .filter_map(Cookie::parse)
            .collect();
        self.store_cookies(url, cookies);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let header = self
            .cookies_for(url)
            .iter()
            .map(Cookie::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            return None;
        }
        HeaderValue::from_str(&header).ok()
    }
}
