//! URL Store Module
//!
//! Keeps the fetched bytes and HTTP validators for every distinct URL the
//! application has asked for, and knows how to revalidate them against
//! the origin with a conditional fetch. Built on the bounded cache, so
//! records age out under the same LRU/TTL/size policy as everything else.

use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder};
use tracing::debug;

use crate::cache::{current_timestamp_ms, BoundedCache, StatsSnapshot};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::fetch::{FetchOutcome, Fetcher, Validators};

// == URL Record ==
/// Everything cached about one URL.
///
/// Created empty on first lookup, populated or overwritten on every
/// successful (non-304) revalidation, and dropped only when the owning
/// cache evicts it.
#[derive(Debug)]
pub struct UrlRecord {
    pub url: String,
    /// Origin-reported modification time, Unix milliseconds
    pub last_modified: Option<i64>,
    /// Origin-reported entity tag
    pub etag: Option<String>,
    pub content_type: Option<String>,
    /// Fully materialized, decoded body
    pub content: Bytes,
    /// Local timestamp of the last successful revalidation, 0 = never
    pub last_revalidated: u64,
}

impl UrlRecord {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            last_modified: None,
            etag: None,
            content_type: None,
            content: Bytes::new(),
            last_revalidated: 0,
        }
    }

    fn validators(&self) -> Validators {
        Validators {
            last_modified: self.last_modified,
            etag: self.etag.clone(),
        }
    }
}

// == URL Store ==
/// Bounded store of `UrlRecord`s keyed by canonical URL string.
///
/// Each record carries its own lock, taken only after the cache's table
/// lock has been released, so a slow revalidation of one URL never blocks
/// access to any other.
pub struct UrlStore {
    records: BoundedCache<Mutex<UrlRecord>>,
    fetcher: Arc<dyn Fetcher>,
}

impl UrlStore {
    // == Constructor ==
    /// Creates a store bounded by `config`, fetching through `fetcher`.
    pub fn new(config: &CacheConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            records: BoundedCache::new(config),
            fetcher,
        }
    }

    // == Open Cached URL ==
    /// Guarantees the record for `url` has been fetched at least once,
    /// then returns its current decoded bytes and content type.
    pub fn open_cached_url(&self, url: &str) -> Result<(Bytes, Option<String>)> {
        let record = self.record_for(url);
        let mut record = lock_record(&record);
        self.revalidate(&mut record)?;
        Ok((record.content.clone(), record.content_type.clone()))
    }

    // == Check Modified ==
    /// Revalidates `url` and reports whether the origin had a newer
    /// version. Fetches the URL for the first time if it was unknown,
    /// which also counts as modified.
    pub fn check_modified(&self, url: &str) -> Result<bool> {
        let record = self.record_for(url);
        let mut record = lock_record(&record);
        self.revalidate(&mut record)
    }

    // == Revalidate ==
    /// Issues a conditional fetch for the record's URL.
    ///
    /// A "not modified" outcome leaves the record untouched and returns
    /// false. A full response replaces the validators, content type and
    /// content (decoded) and returns true. Any transport or decode error
    /// propagates with the record exactly as it was before the attempt.
    pub fn revalidate(&self, record: &mut UrlRecord) -> Result<bool> {
        match self.fetcher.fetch(&record.url, &record.validators())? {
            FetchOutcome::NotModified => Ok(false),
            FetchOutcome::Fetched(resource) => {
                let content =
                    decode_body(&record.url, resource.content_encoding.as_deref(), resource.body)?;

                record.last_modified = resource.last_modified;
                record.etag = resource.etag;
                record.content_type = resource.content_type;
                record.content = content;
                record.last_revalidated = current_timestamp_ms();

                self.records
                    .update_size(&record.url, record.content.len() as u64);
                debug!(url = %record.url, bytes = record.content.len(), "reloaded modified url");
                Ok(true)
            }
        }
    }

    // == Stats ==
    /// Snapshot of the underlying cache counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.records.stats()
    }

    /// Number of URLs currently tracked.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // == Internals ==

    /// Fetch-or-create the record slot. Runs under the table lock only;
    /// the record's own lock is taken by the caller afterwards.
    fn record_for(&self, url: &str) -> Arc<Mutex<UrlRecord>> {
        self.records.add(url, Mutex::new(UrlRecord::new(url)), 0)
    }
}

fn lock_record(record: &Mutex<UrlRecord>) -> MutexGuard<'_, UrlRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

// == Content Decoding ==
/// Materializes a response body, undoing `gzip` or `deflate` content
/// encoding. Unknown encodings are stored as-is.
fn decode_body(url: &str, encoding: Option<&str>, body: Bytes) -> Result<Bytes> {
    let decode_error = |encoding: &str, source| CacheError::Decode {
        url: url.to_string(),
        encoding: encoding.to_string(),
        source,
    };

    match encoding {
        Some(name) if name.eq_ignore_ascii_case("gzip") => {
            let mut decoded = Vec::new();
            GzDecoder::new(&body[..])
                .read_to_end(&mut decoded)
                .map_err(|source| decode_error("gzip", source))?;
            Ok(decoded.into())
        }
        Some(name) if name.eq_ignore_ascii_case("deflate") => {
            // Raw deflate stream, no zlib wrapper
            let mut decoded = Vec::new();
            DeflateDecoder::new(&body[..])
                .read_to_end(&mut decoded)
                .map_err(|source| decode_error("deflate", source))?;
            Ok(decoded.into())
        }
        _ => Ok(body),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchedResource;
    use std::collections::HashMap;
    use std::io::Write;

    /// Scripted origin: serves fixed resources, answers 304 when the
    /// presented validators match, and counts every fetch.
    struct ScriptedOrigin {
        resources: Mutex<HashMap<String, FetchedResource>>,
        fetches: Mutex<Vec<String>>,
    }

    impl ScriptedOrigin {
        fn new() -> Self {
            Self {
                resources: Mutex::new(HashMap::new()),
                fetches: Mutex::new(Vec::new()),
            }
        }

        fn serve(&self, url: &str, resource: FetchedResource) {
            self.resources
                .lock()
                .unwrap()
                .insert(url.to_string(), resource);
        }

        fn fetches_for(&self, url: &str) -> usize {
            self.fetches
                .lock()
                .unwrap()
                .iter()
                .filter(|fetched| fetched.as_str() == url)
                .count()
        }
    }

    impl Fetcher for ScriptedOrigin {
        fn fetch(&self, url: &str, validators: &Validators) -> Result<FetchOutcome> {
            self.fetches.lock().unwrap().push(url.to_string());

            let resources = self.resources.lock().unwrap();
            let resource = resources.get(url).ok_or_else(|| {
                CacheError::transport(
                    url,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such resource"),
                )
            })?;

            // ETag wins over If-Modified-Since when the origin has one
            let not_modified = match (&resource.etag, &validators.etag) {
                (Some(current), Some(presented)) => current == presented,
                (Some(_), None) => false,
                _ => match (validators.last_modified, resource.last_modified) {
                    (Some(since), Some(modified)) => since >= modified,
                    _ => false,
                },
            };
            if not_modified {
                return Ok(FetchOutcome::NotModified);
            }
            Ok(FetchOutcome::Fetched(resource.clone()))
        }
    }

    fn plain_resource(body: &[u8], etag: &str) -> FetchedResource {
        FetchedResource {
            last_modified: Some(1_700_000_000_000),
            etag: Some(etag.to_string()),
            content_type: Some("text/plain".to_string()),
            content_encoding: None,
            body: Bytes::copy_from_slice(body),
        }
    }

    fn store_with(origin: Arc<ScriptedOrigin>) -> UrlStore {
        UrlStore::new(&CacheConfig::default(), origin)
    }

    #[test]
    fn test_open_fetches_once_then_revalidates() {
        let origin = Arc::new(ScriptedOrigin::new());
        origin.serve("http://host/a", plain_resource(b"hello", "v1"));
        let store = store_with(origin.clone());

        let (first, content_type) = store.open_cached_url("http://host/a").unwrap();
        assert_eq!(&first[..], b"hello");
        assert_eq!(content_type.as_deref(), Some("text/plain"));

        // Second open revalidates with matching validators: same bytes,
        // no second full download
        let (second, _) = store.open_cached_url("http://host/a").unwrap();
        assert_eq!(first, second);
        assert_eq!(origin.fetches_for("http://host/a"), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_check_modified_reports_changes() {
        let origin = Arc::new(ScriptedOrigin::new());
        origin.serve("http://host/a", plain_resource(b"one", "v1"));
        let store = store_with(origin.clone());

        // First sighting counts as modified
        assert!(store.check_modified("http://host/a").unwrap());
        // Unchanged origin: not modified
        assert!(!store.check_modified("http://host/a").unwrap());

        origin.serve("http://host/a", plain_resource(b"two", "v2"));
        assert!(store.check_modified("http://host/a").unwrap());
        let (content, _) = store.open_cached_url("http://host/a").unwrap();
        assert_eq!(&content[..], b"two");
    }

    #[test]
    fn test_gzip_body_stored_decoded() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"uncompressed payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let origin = Arc::new(ScriptedOrigin::new());
        origin.serve(
            "http://host/z",
            FetchedResource {
                content_encoding: Some("gzip".to_string()),
                body: compressed.into(),
                ..plain_resource(b"", "v1")
            },
        );
        let store = store_with(origin);

        let (content, _) = store.open_cached_url("http://host/z").unwrap();
        assert_eq!(&content[..], b"uncompressed payload");
    }

    #[test]
    fn test_deflate_body_stored_decoded() {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"raw deflate payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let origin = Arc::new(ScriptedOrigin::new());
        origin.serve(
            "http://host/d",
            FetchedResource {
                content_encoding: Some("deflate".to_string()),
                body: compressed.into(),
                ..plain_resource(b"", "v1")
            },
        );
        let store = store_with(origin);

        let (content, _) = store.open_cached_url("http://host/d").unwrap();
        assert_eq!(&content[..], b"raw deflate payload");
    }

    #[test]
    fn test_corrupt_gzip_fails_closed() {
        let origin = Arc::new(ScriptedOrigin::new());
        origin.serve("http://host/a", plain_resource(b"good", "v1"));
        let store = store_with(origin.clone());
        store.open_cached_url("http://host/a").unwrap();

        // Origin starts serving garbage claiming to be gzip
        origin.serve(
            "http://host/a",
            FetchedResource {
                etag: Some("v2".to_string()),
                content_encoding: Some("gzip".to_string()),
                body: Bytes::from_static(b"\x00\x01not gzip"),
                ..plain_resource(b"", "v2")
            },
        );

        let err = store.open_cached_url("http://host/a").unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));

        // The record kept its previous content
        origin.serve("http://host/a", plain_resource(b"good", "v1"));
        let (content, _) = store.open_cached_url("http://host/a").unwrap();
        assert_eq!(&content[..], b"good");
    }

    #[test]
    fn test_transport_error_propagates() {
        let origin = Arc::new(ScriptedOrigin::new());
        let store = store_with(origin);

        let err = store.open_cached_url("http://host/missing").unwrap_err();
        assert!(matches!(err, CacheError::Transport { .. }));
    }

    #[test]
    fn test_content_size_tracked() {
        let origin = Arc::new(ScriptedOrigin::new());
        origin.serve("http://host/a", plain_resource(b"0123456789", "v1"));
        let store = store_with(origin);

        store.open_cached_url("http://host/a").unwrap();
        assert_eq!(store.records.tracked_size(), 10);
    }
}
