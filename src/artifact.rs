//! Artifact Cache Module
//!
//! Keeps compiled artifacts (scripts, stylesheets) keyed by their source
//! URL, together with the flat set of URLs their compilation referenced.
//! An artifact is stale when its own URL or any dependency URL has a
//! newer version at the origin; staleness replaces the cached pair
//! wholesale with a freshly compiled one.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::{BoundedCache, StatsSnapshot};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::url_store::UrlStore;

// == Compiled Artifact ==
/// A compiled value plus the dependency URLs gathered while compiling it.
///
/// The dependency set is flat: a dependency's own dependencies are not
/// tracked, so a change buried deeper than one level goes unnoticed until
/// the artifact is recompiled for some other reason.
#[derive(Debug, Clone)]
pub struct CompiledArtifact<A> {
    pub artifact: A,
    pub dependencies: BTreeSet<String>,
}

// == Artifact Cache ==
/// Bounded cache of compiled artifacts, invalidated transitively through
/// their dependency URLs via a shared [`UrlStore`].
pub struct ArtifactCache<A> {
    artifacts: BoundedCache<CompiledArtifact<A>>,
    urls: Arc<UrlStore>,
}

impl<A: Send + Sync + 'static> ArtifactCache<A> {
    // == Constructor ==
    /// Creates an artifact cache bounded by `config`, revalidating
    /// through `urls`.
    pub fn new(config: &CacheConfig, urls: Arc<UrlStore>) -> Self {
        let mut artifacts = BoundedCache::new(config);
        artifacts.set_evict_listener(Box::new(|key, _artifact: &Arc<CompiledArtifact<A>>| {
            trace!(url = %key, "compiled artifact dropped");
        }));
        Self { artifacts, urls }
    }

    // == Get Or Compile ==
    /// Returns the artifact for `url`, compiling it if missing or stale.
    ///
    /// Staleness is decided by revalidating `url` itself first and, only
    /// if it was unmodified, each dependency URL in iteration order,
    /// stopping at the first one the origin reports modified.
    ///
    /// `compile` runs under no cache lock, so two threads racing on the
    /// same stale key may both compile; whichever install lands last wins
    /// and the other artifact is discarded. A failure while deciding
    /// staleness propagates and leaves the cached pair in place; once
    /// staleness is established the pair is discarded before compiling,
    /// so a failed recompile means the next call compiles from scratch.
    pub fn get_or_compile<F>(&self, url: &str, compile: F) -> Result<Arc<CompiledArtifact<A>>>
    where
        F: FnOnce(&str) -> anyhow::Result<(A, BTreeSet<String>)>,
    {
        let cached = match self.artifacts.get(url) {
            Some(cached) => cached,
            None => {
                debug!(url = %url, "compiling new artifact");
                return self.compile_and_install(url, compile);
            }
        };

        if self.is_stale(url, &cached.dependencies)? {
            debug!(url = %url, "artifact stale, recompiling");
            self.artifacts.remove(url);
            return self.compile_and_install(url, compile);
        }

        Ok(cached)
    }

    // == Invalidate ==
    /// Drops the cached artifact for `url`, if any. Returns whether one
    /// was present.
    pub fn invalidate(&self, url: &str) -> bool {
        self.artifacts.remove(url).is_some()
    }

    // == Purge ==
    /// Removes every cached artifact the predicate marks stale.
    pub fn purge<F>(&self, is_stale: F)
    where
        F: Fn(&str, &CompiledArtifact<A>) -> bool,
    {
        self.artifacts
            .filter_entries(|key, artifact| is_stale(key, artifact));
    }

    // == Clear ==
    /// Drops every cached artifact.
    pub fn clear(&self) {
        self.artifacts.clear();
    }

    // == Stats ==
    /// Snapshot of the underlying cache counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.artifacts.stats()
    }

    /// Number of cached artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    // == Internals ==

    fn compile_and_install<F>(&self, url: &str, compile: F) -> Result<Arc<CompiledArtifact<A>>>
    where
        F: FnOnce(&str) -> anyhow::Result<(A, BTreeSet<String>)>,
    {
        let (artifact, dependencies) = compile(url)?;
        let pair = Arc::new(CompiledArtifact {
            artifact,
            dependencies,
        });
        // Unconditional install: the new pair replaces the old artifact
        // and its dependency set together. Last writer wins under races.
        self.artifacts.set_shared(url, pair.clone(), 0);
        Ok(pair)
    }

    /// Revalidates the artifact's own URL, then its dependencies,
    /// short-circuiting at the first modified one.
    fn is_stale(&self, url: &str, dependencies: &BTreeSet<String>) -> Result<bool> {
        if self.urls.check_modified(url)? {
            return Ok(true);
        }
        for dependency in dependencies {
            if self.urls.check_modified(dependency)? {
                trace!(url = %url, dependency = %dependency, "dependency modified");
                return Ok(true);
            }
        }
        Ok(false)
    }
}
