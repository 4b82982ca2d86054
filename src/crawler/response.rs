//! Outcome of one request

use crate::crawler::charset::normalize_body;
use crate::crawler::{Context, HttpTrace, Request};
use crate::Result;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

/// Response handed to response, error and scraped callbacks
///
/// Error callbacks may receive a shell with status 0 and an empty body when
/// the request failed before a response arrived.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    /// Body after charset normalization
    pub body: Vec<u8>,
    /// Same bag as `request.ctx`
    pub ctx: Context,
    pub request: Arc<Request>,
    pub trace: Option<HttpTrace>,
}

impl Response {
    pub(crate) fn shell(request: Arc<Request>) -> Self {
        Self {
            status: 0,
            headers: HeaderMap::new(),
            body: Vec::new(),
            ctx: request.ctx.clone(),
            request,
            trace: None,
        }
    }

    /// Returns the body as text, replacing invalid UTF-8 sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Returns a header value as a string, if present and printable
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Lowercased media type without parameters; sniffed from the body when
    /// the header is missing
    pub fn media_type(&self) -> String {
        match self.content_type() {
            Some(ct) => ct
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase(),
            None => sniff_media_type(&self.body).to_string(),
        }
    }

    /// Writes the body to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.body)?;
        Ok(())
    }

    /// Suggests a file name for the body
    ///
    /// Uses the `Content-Disposition` filename when present, the URL path
    /// (and query) otherwise.
    pub fn file_name(&self) -> String {
        if let Some(name) = self
            .header(CONTENT_DISPOSITION.as_str())
            .and_then(disposition_filename)
        {
            return sanitize_file_name(&name);
        }

        let url = &self.request.url;
        match url.query() {
            Some(query) => sanitize_file_name(&format!("{}_{}", url.path(), query)),
            None => sanitize_file_name(url.path().trim_start_matches('/')),
        }
    }

    pub(crate) fn fix_charset(&mut self, detect: bool) {
        let body = std::mem::take(&mut self.body);
        let content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        self.body = normalize_body(
            body,
            content_type,
            self.request.response_character_encoding.as_deref(),
            detect,
        );
    }
}

/// Guesses a media type from the first bytes of a body
pub(crate) fn sniff_media_type(body: &[u8]) -> &'static str {
    let head: Vec<u8> = body
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take(64)
        .map(|b| b.to_ascii_lowercase())
        .collect();

    if head.starts_with(b"<!doctype html") || head.starts_with(b"<html") {
        "text/html"
    } else if head.starts_with(b"<?xml") {
        "text/xml"
    } else if std::str::from_utf8(body).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

fn disposition_filename(value: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("filename") {
            Some(val.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Makes a string safe to use as a file name
///
/// Characters other than ASCII letters, digits and `_` become `_`; the
/// extension is kept (or `unknown` when missing).
pub fn sanitize_file_name(name: &str) -> String {
    fn clean(part: &str) -> String {
        part.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect::<String>()
            .trim_matches('_')
            .to_string()
    }

    let last_segment_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > last_segment_start => (&name[..dot], &name[dot + 1..]),
        _ => (name, ""),
    };

    let ext = clean(ext);
    let ext = if ext.is_empty() { "unknown".to_string() } else { ext };
    format!("{}.{}", clean(stem), ext)
}
