//! HTTP response metadata for failure classification.
//!
//! Pure construction and parsing helpers: an error builder carrying
//! status/headers/Retry-After, header normalization, and Retry-After
//! parsing. No state lives here; the classifier and orchestrator
//! consume what these produce.

use chrono::DateTime;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Response metadata extracted from a failed call.
///
/// Everything is optional: a plain network error has none of it, an
/// HTTP failure usually has a status and sometimes headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: Option<u16>,
    /// Header map with lower-cased keys and trimmed values.
    pub headers: Option<HashMap<String, String>>,
    /// Parsed `Retry-After` value, when the server supplied one.
    pub retry_after: Option<Duration>,
}

/// Capability trait for errors that can expose response metadata.
///
/// The engine classifies through this trait; plain error types opt in
/// with an empty impl (the default reports no metadata):
///
/// ```
/// use redrive_core::WithResponseMeta;
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("parse failed: {0}")]
/// struct ParseError(String);
///
/// impl WithResponseMeta for ParseError {}
/// ```
pub trait WithResponseMeta: std::error::Error {
    fn response_meta(&self) -> Option<&ResponseMeta> {
        None
    }
}

impl WithResponseMeta for std::io::Error {}

/// An HTTP-shaped error with attached response metadata.
///
/// Built incrementally: `HttpError::new("...").with_status(503)`.
/// Attaching headers normalizes them and fills `retry_after` from a
/// parsable `retry-after` header unless one was set explicitly.
#[derive(Debug, Clone)]
pub struct HttpError {
    message: String,
    meta: ResponseMeta,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            meta: ResponseMeta::default(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.meta.status = Some(status);
        self
    }

    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let headers = normalize_headers(headers);
        if self.meta.retry_after.is_none()
            && let Some(value) = headers.get("retry-after")
            && let Some(secs) = parse_retry_after(value)
        {
            self.meta.retry_after = Some(Duration::from_secs(secs));
        }
        self.meta.headers = Some(headers);
        self
    }

    /// Set `Retry-After` directly. Takes precedence over any value
    /// later derived from headers.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.meta.retry_after = Some(retry_after);
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.meta.status
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.meta.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for HttpError {}

impl WithResponseMeta for HttpError {
    fn response_meta(&self) -> Option<&ResponseMeta> {
        Some(&self.meta)
    }
}

/// Normalize a header collection into a lower-cased, trimmed map.
pub fn normalize_headers<I, K, V>(headers: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    headers
        .into_iter()
        .map(|(key, value)| {
            (
                key.as_ref().to_ascii_lowercase(),
                value.as_ref().trim().to_string(),
            )
        })
        .collect()
}

/// Parse a `Retry-After` header value into whole seconds.
///
/// Accepts the integer-seconds form or an HTTP date (RFC 2822, with an
/// RFC 3339 fallback). Dates resolve to seconds from now, floored at
/// zero. Unparseable input yields `None`.
///
/// ```
/// use redrive_core::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(120));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }

    let date = DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()?;
    let delta = date.signed_duration_since(Utc::now()).num_seconds();
    Some(delta.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_retry_after_integer_seconds() {
        assert_eq!(parse_retry_after("120"), Some(120));
        assert_eq!(parse_retry_after(" 5 "), Some(5));
        assert_eq!(parse_retry_after("0"), Some(0));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let date = Utc::now() + TimeDelta::seconds(60);
        let secs = parse_retry_after(&date.to_rfc2822()).expect("should parse rfc2822 date");
        assert!(
            (59..=61).contains(&secs),
            "expected ~60s from rfc2822 date, got {secs}"
        );
    }

    #[test]
    fn test_parse_retry_after_rfc3339_fallback() {
        let date = Utc::now() + TimeDelta::seconds(120);
        let secs = parse_retry_after(&date.to_rfc3339()).expect("should parse rfc3339 date");
        assert!(
            (119..=121).contains(&secs),
            "expected ~120s from rfc3339 date, got {secs}"
        );
    }

    #[test]
    fn test_parse_retry_after_past_date_floors_at_zero() {
        let date = Utc::now() - TimeDelta::seconds(90);
        assert_eq!(parse_retry_after(&date.to_rfc2822()), Some(0));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_normalize_headers_lowercases_and_trims() {
        let headers = normalize_headers([
            ("Retry-After", " 30 "),
            ("X-RateLimit-Remaining", "8"),
        ]);

        assert_eq!(headers.get("retry-after").map(String::as_str), Some("30"));
        assert_eq!(
            headers.get("x-ratelimit-remaining").map(String::as_str),
            Some("8")
        );
        assert!(!headers.contains_key("Retry-After"));
    }

    #[test]
    fn test_builder_fills_retry_after_from_headers() {
        let err = HttpError::new("too many requests")
            .with_status(429)
            .with_headers([("Retry-After", "7")]);

        let meta = err.response_meta().expect("http error carries meta");
        assert_eq!(meta.status, Some(429));
        assert_eq!(meta.retry_after, Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_explicit_retry_after_wins_over_header() {
        let err = HttpError::new("too many requests")
            .with_retry_after(Duration::from_secs(3))
            .with_headers([("Retry-After", "9")]);

        let meta = err.response_meta().expect("http error carries meta");
        assert_eq!(meta.retry_after, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_display_includes_status_when_present() {
        let err = HttpError::new("upstream unavailable").with_status(503);
        assert_eq!(err.to_string(), "HTTP 503: upstream unavailable");

        let plain = HttpError::new("socket closed");
        assert_eq!(plain.to_string(), "socket closed");
    }

    #[test]
    fn test_io_error_reports_no_meta() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "request timed out");
        assert!(err.response_meta().is_none());
    }
}
