//! Text helpers for config values and store responses.

use url::Url;

/// Longest excerpt of remote text kept in error messages.
const EXCERPT_CHARS: usize = 180;

/// Trimmed `value`, or `None` when it is missing or blank.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Whether `value` parses as an absolute `http`/`https` URL with a host.
pub fn is_http_url(value: &str) -> bool {
    Url::parse(value.trim()).is_ok_and(|url| {
        matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|host| !host.is_empty())
    })
}

/// First characters of `value` for an error message, marking truncation.
pub fn excerpt(value: &str) -> String {
    let value = value.trim();
    let mut out: String = value.chars().take(EXCERPT_CHARS).collect();
    if out.len() < value.len() {
        out.push_str("...");
    }
    out
}
