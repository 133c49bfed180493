use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{PersistentStore, StoreError, Table};
use crate::cache::{CacheCategory, CacheEntry};
use crate::domain::Upstream;
use crate::metrics::{ApiMetric, CallStatus};
use crate::ratelimit::RateLimitState;
use crate::runtime::lock;
use crate::session::AuthSession;

/// Process-local store. Tables can be switched off to exercise bypass paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    rate_limits: HashMap<Upstream, RateLimitState>,
    cache: HashMap<String, CacheEntry>,
    metrics: Vec<ApiMetric>,
    sessions: HashMap<String, AuthSession>,
    missing: HashSet<Table>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_table(self, table: Table) -> Self {
        lock(&self.inner).missing.insert(table);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.inner).unavailable = unavailable;
    }

    pub fn metric_count(&self) -> usize {
        lock(&self.inner).metrics.len()
    }

    fn with_table<T>(
        &self,
        table: Table,
        op: impl FnOnce(&mut Tables) -> T,
    ) -> Result<T, StoreError> {
        let mut tables = lock(&self.inner);
        if tables.unavailable {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        if tables.missing.contains(&table) {
            return Err(StoreError::TableMissing(table));
        }
        Ok(op(&mut tables))
    }
}

impl PersistentStore for MemoryStore {
    fn get_rate_limit(&self, api: Upstream) -> Result<Option<RateLimitState>, StoreError> {
        self.with_table(Table::RateLimits, |t| t.rate_limits.get(&api).cloned())
    }

    fn put_rate_limit(&self, state: &RateLimitState) -> Result<(), StoreError> {
        self.with_table(Table::RateLimits, |t| {
            t.rate_limits.insert(state.api, state.clone());
        })
    }

    fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.with_table(Table::Cache, |t| t.cache.get(key).cloned())
    }

    fn put_cache(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        self.with_table(Table::Cache, |t| {
            t.cache.insert(entry.key.clone(), entry.clone());
        })
    }

    fn delete_cache(&self, key: &str) -> Result<(), StoreError> {
        self.with_table(Table::Cache, |t| {
            t.cache.remove(key);
        })
    }

    fn list_cache_keys(&self, category: CacheCategory) -> Result<Vec<String>, StoreError> {
        self.with_table(Table::Cache, |t| {
            let mut keys = t
                .cache
                .values()
                .filter(|entry| entry.category == category)
                .map(|entry| entry.key.clone())
                .collect::<Vec<_>>();
            keys.sort();
            keys
        })
    }

    fn insert_metric(&self, metric: &ApiMetric) -> Result<(), StoreError> {
        self.with_table(Table::Metrics, |t| t.metrics.push(metric.clone()))
    }

    fn count_metrics(
        &self,
        api: Upstream,
        statuses: &[CallStatus],
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.with_table(Table::Metrics, |t| {
            t.metrics
                .iter()
                .filter(|m| m.api == api && m.timestamp >= since && statuses.contains(&m.status))
                .count() as u64
        })
    }

    fn list_metrics(
        &self,
        api: Upstream,
        since: DateTime<Utc>,
    ) -> Result<Vec<ApiMetric>, StoreError> {
        self.with_table(Table::Metrics, |t| {
            t.metrics
                .iter()
                .filter(|m| m.api == api && m.timestamp >= since)
                .cloned()
                .collect()
        })
    }

    fn get_session(&self, id: &str) -> Result<Option<AuthSession>, StoreError> {
        self.with_table(Table::Sessions, |t| t.sessions.get(id).cloned())
    }

    fn put_session(&self, id: &str, session: &AuthSession) -> Result<(), StoreError> {
        self.with_table(Table::Sessions, |t| {
            t.sessions.insert(id.to_string(), session.clone());
        })
    }
}
