//! Shared plumbing for the per-registry adapters.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{CacheCategory, CacheManager};
use crate::domain::{GeneSymbol, Organism, Upstream};
use crate::error::KiraError;
use crate::fragment::GeneFragment;
use crate::metrics::MetricsMonitor;
use crate::ratelimit::RateLimiter;

#[derive(Debug, Clone)]
pub struct FragmentQuery {
    pub symbol: GeneSymbol,
    pub organism: &'static Organism,
    /// Protein registry accession, known once the primary adapters answered.
    pub uniprot_id: Option<String>,
}

impl FragmentQuery {
    pub fn new(symbol: GeneSymbol, organism: &'static Organism) -> Self {
        Self {
            symbol,
            organism,
            uniprot_id: None,
        }
    }

    pub fn with_uniprot_id(mut self, uniprot_id: Option<String>) -> Self {
        self.uniprot_id = uniprot_id;
        self
    }
}

/// One upstream registry as seen by the orchestrator.
///
/// `fetch` returns an empty fragment when the registry simply has no data and
/// an error only when the registry could not be asked.
pub trait SourceAdapter: Send + Sync {
    fn upstream(&self) -> Upstream;
    fn fetch(&self, query: &FragmentQuery) -> Result<GeneFragment, KiraError>;
}

/// Rate limiter, cache and metrics shared by every adapter call.
#[derive(Clone)]
pub struct AdapterContext {
    limiter: Arc<RateLimiter>,
    cache: CacheManager,
    metrics: Arc<MetricsMonitor>,
}

impl AdapterContext {
    pub fn new(limiter: Arc<RateLimiter>, cache: CacheManager, metrics: Arc<MetricsMonitor>) -> Self {
        Self {
            limiter,
            cache,
            metrics,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn metrics(&self) -> &MetricsMonitor {
        &self.metrics
    }

    /// Runs one upstream request through cache, rate limiter and metrics.
    /// `call` receives the upstream's deadline.
    pub fn call<T, F>(
        &self,
        api: Upstream,
        endpoint: &'static str,
        key: String,
        category: CacheCategory,
        call: F,
    ) -> Result<T, KiraError>
    where
        T: Serialize + DeserializeOwned + 'static,
        F: FnOnce(Duration) -> Result<T, KiraError> + Send + 'static,
    {
        let limiter = Arc::clone(&self.limiter);
        let metrics = Arc::clone(&self.metrics);
        let cached = self.cache.get_or_fetch(&key, category, move || {
            limiter.run_with_limit(api, |deadline| {
                metrics.with_metrics(api, endpoint, || call(deadline))
            })
        })?;
        if cached.from_cache {
            self.metrics.record_cache_hit(api, endpoint);
        }
        Ok(cached.data)
    }

    /// Same as [`AdapterContext::call`] without the cache.
    pub fn call_uncached<T, F>(&self, api: Upstream, endpoint: &'static str, call: F) -> Result<T, KiraError>
    where
        F: FnOnce(Duration) -> Result<T, KiraError>,
    {
        self.limiter.run_with_limit(api, |deadline| {
            self.metrics.with_metrics(api, endpoint, || call(deadline))
        })
    }
}

/// Cache key shared by every adapter: `api:endpoint:part1:part2...`.
pub fn cache_key(api: Upstream, endpoint: &str, parts: &[&str]) -> String {
    let mut key = format!("{api}:{endpoint}");
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}
