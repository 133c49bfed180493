#![allow(dead_code)]

use std::fs;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::Value;

use kira_gene_aggregator::adapter::AdapterContext;
use kira_gene_aggregator::cache::CacheManager;
use kira_gene_aggregator::metrics::{MetricsMonitor, TracingAlertSink};
use kira_gene_aggregator::ratelimit::{RateLimitTable, RateLimiter};
use kira_gene_aggregator::runtime::{DeferredSpawner, ManualClock};
use kira_gene_aggregator::store::{MemoryStore, PersistentStore};

/// Memory store, virtual clock and deferred background work wired into one
/// adapter context.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub spawner: Arc<DeferredSpawner>,
    pub context: AdapterContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        Self::with_parts(store, RateLimitTable::default())
    }

    pub fn with_parts(store: MemoryStore, rate_limits: RateLimitTable) -> Self {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(start()));
        let spawner = Arc::new(DeferredSpawner::new());
        let shared: Arc<dyn PersistentStore> = store.clone();
        let context = AdapterContext::new(
            Arc::new(RateLimiter::new(
                rate_limits,
                Arc::clone(&shared),
                clock.clone(),
            )),
            CacheManager::new(Arc::clone(&shared), clock.clone(), spawner.clone()),
            Arc::new(MetricsMonitor::new(
                shared,
                clock.clone(),
                Arc::new(TracingAlertSink),
            )),
        );
        Self {
            store,
            clock,
            spawner,
            context,
        }
    }

    pub fn shared_store(&self) -> Arc<dyn PersistentStore> {
        self.store.clone()
    }
}

pub fn start() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .expect("valid start time")
}

pub fn fixture(name: &str) -> String {
    fs::read_to_string(format!("tests/fixtures/{name}")).unwrap()
}

pub fn fixture_json(name: &str) -> Value {
    serde_json::from_str(&fixture(name)).unwrap()
}
