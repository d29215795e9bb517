//! Fetch Module
//!
//! The transport boundary of the cache: a `Fetcher` is given a URL plus
//! the stored validators and reports either "not modified" or a full
//! response. Bodies come back exactly as sent on the wire; undoing
//! `gzip`/`deflate` content encoding is the cache's job, not the
//! transport's.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::redirect;
use reqwest::StatusCode;
use tracing::trace;

use crate::error::{CacheError, Result};

/// `Accept` preference list sent with every fetch.
const ACCEPT_PREFERENCES: &str = "text/xml,text/html;q=0.9,text/plain;q=0.8,*/*;q=0.1";

// == Validators ==
/// The conditional-fetch validators stored with a cached URL.
#[derive(Debug, Clone, Default)]
pub struct Validators {
    /// Origin-reported last modification time, Unix milliseconds
    pub last_modified: Option<i64>,
    /// Origin-reported entity tag
    pub etag: Option<String>,
}

// == Fetched Resource ==
/// A full (non-304) response from the origin.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub last_modified: Option<i64>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// `Content-Encoding` as reported; the body below is still encoded
    pub content_encoding: Option<String>,
    pub body: Bytes,
}

// == Fetch Outcome ==
/// Result of a conditional fetch.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The validators still match; the origin sent no body
    NotModified,
    /// The resource changed; here is the new representation
    Fetched(FetchedResource),
}

// == Fetcher ==
/// The fetch collaborator. Implementations block until the origin
/// responds or the transport's own timeout fires; the cache adds no
/// timeout of its own.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, validators: &Validators) -> Result<FetchOutcome>;
}

// == HTTP Fetcher ==
/// Production `Fetcher` over a blocking HTTP client.
///
/// Sends `If-Modified-Since` and `If-None-Match` from the validators and
/// advertises `Accept-Encoding: gzip, deflate`; response bodies are
/// returned undecoded.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with redirect-following defaults.
    pub fn new() -> reqwest::Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    /// Creates a fetcher over a caller-configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, validators: &Validators) -> Result<FetchOutcome> {
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_PREFERENCES)
            .header(ACCEPT_ENCODING, "gzip, deflate");

        if let Some(since) = validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, http_date(since));
        }
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request
            .send()
            .map_err(|source| CacheError::transport(url, source))?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            trace!(url = %url, "origin reports not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(CacheError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let (last_modified, etag, content_type, content_encoding) = {
            let header = |name| {
                response
                    .headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
            };
            (
                header(LAST_MODIFIED).as_deref().and_then(parse_http_date),
                header(ETAG),
                header(CONTENT_TYPE),
                header(CONTENT_ENCODING),
            )
        };

        let body = response
            .bytes()
            .map_err(|source| CacheError::transport(url, source))?;

        Ok(FetchOutcome::Fetched(FetchedResource {
            last_modified,
            etag,
            content_type,
            content_encoding,
            body,
        }))
    }
}

// == HTTP Date Helpers ==
/// Formats a Unix-millisecond timestamp as an IMF-fixdate header value.
fn http_date(epoch_ms: i64) -> String {
    let datetime = DateTime::<Utc>::from_timestamp_millis(epoch_ms).unwrap_or_default();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date header into Unix milliseconds.
fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|datetime| datetime.timestamp_millis())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_date_format() {
        // 2015-10-21 07:28:00 UTC
        assert_eq!(http_date(1_445_412_480_000), "Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn test_parse_http_date() {
        let parsed = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(parsed, 1_445_412_480_000);
    }

    #[test]
    fn test_http_date_round_trip() {
        // Sub-second precision is lost in the header format
        let ms = 1_700_000_000_000;
        assert_eq!(parse_http_date(&http_date(ms)), Some(ms));
    }

    #[test]
    fn test_parse_http_date_rejects_garbage() {
        assert!(parse_http_date("not a date").is_none());
        assert!(parse_http_date("").is_none());
    }

    #[test]
    fn test_validators_default_is_unconditional() {
        let validators = Validators::default();
        assert!(validators.last_modified.is_none());
        assert!(validators.etag.is_none());
    }
}
