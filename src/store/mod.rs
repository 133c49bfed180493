//! Persisted key/record store shared by the limiter, cache, metrics monitor
//! and session manager.
//!
//! Tables may be absent. Callers treat every `StoreError` as a signal to
//! bypass persistence, never as a reason to fail a request.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cache::{CacheCategory, CacheEntry};
use crate::domain::Upstream;
use crate::metrics::{ApiMetric, CallStatus};
use crate::ratelimit::RateLimitState;
use crate::session::AuthSession;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    RateLimits,
    Cache,
    Metrics,
    Sessions,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::RateLimits, Table::Cache, Table::Metrics, Table::Sessions];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::RateLimits => "rate_limits",
            Table::Cache => "cache",
            Table::Metrics => "metrics",
            Table::Sessions => "sessions",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table {0} is not provisioned")]
    TableMissing(Table),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store i/o failed: {0}")]
    Io(String),

    #[error("store record is corrupt: {0}")]
    Serde(String),
}

pub trait PersistentStore: Send + Sync {
    fn get_rate_limit(&self, api: Upstream) -> Result<Option<RateLimitState>, StoreError>;
    fn put_rate_limit(&self, state: &RateLimitState) -> Result<(), StoreError>;

    fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;
    fn put_cache(&self, entry: &CacheEntry) -> Result<(), StoreError>;
    fn delete_cache(&self, key: &str) -> Result<(), StoreError>;
    fn list_cache_keys(&self, category: CacheCategory) -> Result<Vec<String>, StoreError>;

    fn insert_metric(&self, metric: &ApiMetric) -> Result<(), StoreError>;
    fn count_metrics(
        &self,
        api: Upstream,
        statuses: &[CallStatus],
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
    fn list_metrics(&self, api: Upstream, since: DateTime<Utc>)
    -> Result<Vec<ApiMetric>, StoreError>;

    fn get_session(&self, id: &str) -> Result<Option<AuthSession>, StoreError>;
    fn put_session(&self, id: &str, session: &AuthSession) -> Result<(), StoreError>;
}
