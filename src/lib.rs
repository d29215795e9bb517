//! recache - A revalidating in-memory cache
//!
//! Fetches remote resources and keeps compiled artifacts (scripts,
//! stylesheets) fresh without re-fetching or recompiling on every access:
//! a generic bounded cache with combined LRU/TTL/size eviction, a URL
//! store that revalidates against the origin with conditional fetches,
//! and an artifact cache invalidated through its dependency URLs.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod url_store;

pub use artifact::{ArtifactCache, CompiledArtifact};
pub use cache::{BoundedCache, EvictListener, StatsSnapshot};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use fetch::{FetchOutcome, FetchedResource, Fetcher, HttpFetcher, Validators};
pub use url_store::{UrlRecord, UrlStore};
