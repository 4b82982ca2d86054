//! Response body character-set normalization
//!
//! Bodies handed to callbacks are UTF-8 whenever the declared (or forced)
//! charset is a WHATWG encoding label. A UTF-8 BOM is stripped. Unknown
//! labels and binary media types pass through untouched.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

const BINARY_MEDIA_PREFIXES: &[&str] = &["image/", "video/", "audio/", "font/"];

/// Extracts the `charset` parameter of a Content-Type value
pub fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"'))
        } else {
            None
        }
    })
}

fn strip_bom(mut body: Vec<u8>) -> Vec<u8> {
    if body.starts_with(UTF8_BOM) {
        body.drain(..UTF8_BOM.len());
    }
    body
}

fn transcode(body: Vec<u8>, encoding: &'static Encoding) -> Vec<u8> {
    if encoding == UTF_8 {
        return strip_bom(body);
    }
    let (text, used, had_errors) = encoding.decode(&body);
    if had_errors {
        tracing::debug!("Replaced malformed {} sequences in body", used.name());
    }
    text.into_owned().into_bytes()
}

/// Converts a response body to UTF-8
///
/// # Arguments
///
/// * `body` - The raw body bytes
/// * `content_type` - The response Content-Type header, if any
/// * `encoding_override` - Encoding forced by the request; wins over the header
/// * `detect` - Treat undeclared bodies that are not valid UTF-8 as windows-1252
pub fn normalize_body(
    body: Vec<u8>,
    content_type: Option<&str>,
    encoding_override: Option<&str>,
    detect: bool,
) -> Vec<u8> {
    if body.is_empty() {
        return body;
    }

    let label = match encoding_override {
        Some(label) => label.to_string(),
        None => {
            let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
            if BINARY_MEDIA_PREFIXES
                .iter()
                .any(|prefix| content_type.contains(prefix))
            {
                return body;
            }

            match charset_param(&content_type) {
                Some(label) => label.to_string(),
                None if !detect || std::str::from_utf8(&body).is_ok() => {
                    return strip_bom(body);
                }
                None => return transcode(body, WINDOWS_1252),
            }
        }
    };

    match Encoding::for_label(label.trim().as_bytes()) {
        Some(encoding) => transcode(body, encoding),
        None => {
            tracing::debug!("Leaving body in unknown charset {:?}", label);
            body
        }
    }
}
