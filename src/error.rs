//! Error types for the revalidating cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache subsystem.
///
/// The cache recovers nothing on its own: every collaborator failure is a
/// hard failure for the current operation and surfaces here synchronously.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Network or I/O failure during a fetch or revalidation.
    ///
    /// Never converted into "serve stale": the cached record is left exactly
    /// as it was before the attempt.
    #[error("fetch failed for {url}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The origin replied with an unexpected (non-2xx, non-304) status.
    #[error("origin returned status {status} for {url}")]
    Status { url: String, status: u16 },

    /// The response body could not be decoded (gzip / deflate).
    #[error("failed to decode {encoding} response body for {url}")]
    Decode {
        url: String,
        encoding: String,
        #[source]
        source: std::io::Error,
    },

    /// The compile collaborator failed; passed through unchanged.
    #[error(transparent)]
    Compile(#[from] anyhow::Error),
}

impl CacheError {
    /// Wraps an arbitrary error as a transport failure for `url`.
    pub fn transport(
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CacheError::Transport {
            url: url.into(),
            source: Box::new(source),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache subsystem.
pub type Result<T> = std::result::Result<T, CacheError>;

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_display_includes_url() {
        let err = CacheError::transport(
            "http://example.com/app.js",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(err.to_string().contains("http://example.com/app.js"));
    }

    #[test]
    fn test_transport_preserves_source() {
        let err = CacheError::transport(
            "http://example.com/",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
        );
        let source = std::error::Error::source(&err).expect("source should be set");
        assert!(source.to_string().contains("timed out"));
    }

    #[test]
    fn test_compile_passthrough() {
        let inner = anyhow::anyhow!("syntax error on line 3");
        let err = CacheError::from(inner);
        assert_eq!(err.to_string(), "syntax error on line 3");
    }
}
