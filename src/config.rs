//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
/// A limit of 0 disables the corresponding bound.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of live entries a cache table can hold (0 = unbounded)
    pub max_entries: usize,
    /// Maximum aggregate tracked size in bytes (0 = unbounded)
    pub max_size_bytes: u64,
    /// Default TTL in milliseconds for entries inserted without one (0 = never expires)
    pub max_age_ms: u64,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Maximum live entries per table (default: 128)
    /// - `MAX_SIZE_BYTES` - Aggregate tracked size cap (default: 16 MB)
    /// - `MAX_AGE_MS` - Default entry TTL in milliseconds (default: 1 hour)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env::var("MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_entries),
            max_size_bytes: env::var("MAX_SIZE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_size_bytes),
            max_age_ms: env::var("MAX_AGE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_age_ms),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 128,
            max_size_bytes: 16 * 1024 * 1024,
            max_age_ms: 3_600_000,
        }
    }
}
