//! Stale-while-revalidate cache over the persisted store.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KiraError;
use crate::runtime::{Clock, TaskSpawner, lock, to_chrono};
use crate::store::PersistentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    GeneRecord,
    ProteinRecord,
    StructurePrediction,
    ExperimentalStructures,
    Interactions,
    Regulation,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 6] = [
        CacheCategory::GeneRecord,
        CacheCategory::ProteinRecord,
        CacheCategory::StructurePrediction,
        CacheCategory::ExperimentalStructures,
        CacheCategory::Interactions,
        CacheCategory::Regulation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::GeneRecord => "gene_record",
            CacheCategory::ProteinRecord => "protein_record",
            CacheCategory::StructurePrediction => "structure_prediction",
            CacheCategory::ExperimentalStructures => "experimental_structures",
            CacheCategory::Interactions => "interactions",
            CacheCategory::Regulation => "regulation",
        }
    }

    pub fn ttl(self) -> Duration {
        const HOUR: u64 = 60 * 60;
        match self {
            CacheCategory::GeneRecord => Duration::from_secs(7 * 24 * HOUR),
            CacheCategory::ProteinRecord => Duration::from_secs(7 * 24 * HOUR),
            CacheCategory::StructurePrediction => Duration::from_secs(30 * 24 * HOUR),
            CacheCategory::ExperimentalStructures => Duration::from_secs(7 * 24 * HOUR),
            CacheCategory::Interactions => Duration::from_secs(3 * 24 * HOUR),
            CacheCategory::Regulation => Duration::from_secs(24 * HOUR),
        }
    }

    pub fn stale_window(self) -> Duration {
        const DAY: u64 = 24 * 60 * 60;
        match self {
            CacheCategory::GeneRecord | CacheCategory::ProteinRecord => {
                Duration::from_secs(30 * DAY)
            }
            CacheCategory::StructurePrediction => Duration::from_secs(60 * DAY),
            CacheCategory::ExperimentalStructures => Duration::from_secs(14 * DAY),
            CacheCategory::Interactions => Duration::from_secs(7 * DAY),
            CacheCategory::Regulation => Duration::from_secs(3 * DAY),
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheCategory {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace('-', "_");
        CacheCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| KiraError::InvalidRequest(format!("unknown cache category: {value}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub category: CacheCategory,
    pub payload: Value,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: &str, category: CacheCategory, payload: Value, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            category,
            payload,
            fetched_at: now,
            expires_at: now + to_chrono(category.ttl()),
        }
    }

    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        let age = now - self.fetched_at;
        let ttl = to_chrono(self.category.ttl());
        let stale_window = to_chrono(self.category.stale_window());
        if age < ttl {
            Freshness::Fresh
        } else if age < ttl + stale_window {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub data: T,
    pub from_cache: bool,
    pub is_stale: bool,
}

impl<T> Cached<T> {
    fn fetched(data: T) -> Self {
        Self {
            data,
            from_cache: false,
            is_stale: false,
        }
    }
}

#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn TaskSpawner>,
    revalidating: Arc<Mutex<HashSet<String>>>,
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        Self {
            store,
            clock,
            spawner,
            revalidating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn get_or_fetch<T, F>(
        &self,
        key: &str,
        category: CacheCategory,
        fetcher: F,
    ) -> Result<Cached<T>, KiraError>
    where
        T: Serialize + DeserializeOwned + 'static,
        F: FnOnce() -> Result<T, KiraError> + Send + 'static,
    {
        let entry = match self.store.get_cache(key) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(key, error = %err, "cache store unavailable, bypassing");
                None
            }
        };

        let Some(entry) = entry else {
            tracing::debug!(key, %category, "cache miss");
            return self.fetch_and_store(key, category, fetcher);
        };

        let freshness = entry.freshness(self.clock.now());
        if freshness == Freshness::Expired {
            tracing::debug!(key, %category, "cache entry expired, refetching");
            return self.fetch_and_store(key, category, fetcher);
        }

        let data = match serde_json::from_value::<T>(entry.payload) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(key, error = %err, "cached payload unreadable, refetching");
                return self.fetch_and_store(key, category, fetcher);
            }
        };

        let is_stale = freshness == Freshness::Stale;
        if is_stale {
            tracing::debug!(key, %category, "serving stale entry, scheduling revalidation");
            self.schedule_revalidation(key, category, fetcher);
        } else {
            tracing::trace!(key, %category, "cache hit");
        }
        Ok(Cached {
            data,
            from_cache: true,
            is_stale,
        })
    }

    pub fn invalidate(&self, key: &str) {
        if let Err(err) = self.store.delete_cache(key) {
            tracing::debug!(key, error = %err, "cache invalidation skipped");
        }
    }

    /// Deletes every entry of `category`, returning how many were removed.
    pub fn purge_category(&self, category: CacheCategory) -> usize {
        let keys = match self.store.list_cache_keys(category) {
            Ok(keys) => keys,
            Err(err) => {
                tracing::debug!(%category, error = %err, "cache purge skipped");
                return 0;
            }
        };
        keys.iter()
            .filter(|key| self.store.delete_cache(key).is_ok())
            .count()
    }

    fn fetch_and_store<T, F>(
        &self,
        key: &str,
        category: CacheCategory,
        fetcher: F,
    ) -> Result<Cached<T>, KiraError>
    where
        T: Serialize,
        F: FnOnce() -> Result<T, KiraError>,
    {
        let data = fetcher()?;
        match serde_json::to_value(&data) {
            Ok(payload) => write_entry(&*self.store, key, category, payload, self.clock.now()),
            Err(err) => tracing::warn!(key, error = %err, "payload not cacheable"),
        }
        Ok(Cached::fetched(data))
    }

    fn schedule_revalidation<T, F>(&self, key: &str, category: CacheCategory, fetcher: F)
    where
        T: Serialize + 'static,
        F: FnOnce() -> Result<T, KiraError> + Send + 'static,
    {
        if !lock(&self.revalidating).insert(key.to_string()) {
            tracing::trace!(key, "revalidation already in flight");
            return;
        }
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let revalidating = Arc::clone(&self.revalidating);
        let key = key.to_string();
        let task_key = key.clone();
        let task = move || {
            match fetcher().and_then(|data| {
                serde_json::to_value(&data).map_err(|err| KiraError::Internal(err.to_string()))
            }) {
                Ok(payload) => {
                    write_entry(&*store, &task_key, category, payload, clock.now());
                    tracing::debug!(key = %task_key, "revalidated cache entry");
                }
                Err(err) => {
                    tracing::warn!(key = %task_key, error = %err, "revalidation failed, keeping stale entry");
                }
            }
            lock(&revalidating).remove(&task_key);
        };
        if let Err(err) = self.spawner.spawn(&format!("revalidate:{key}"), Box::new(task)) {
            tracing::warn!(key = %key, error = %err, "failed to spawn revalidation");
            lock(&self.revalidating).remove(&key);
        }
    }
}

fn write_entry(
    store: &dyn PersistentStore,
    key: &str,
    category: CacheCategory,
    payload: Value,
    now: DateTime<Utc>,
) {
    let entry = CacheEntry::new(key, category, payload, now);
    if let Err(err) = store.put_cache(&entry) {
        tracing::debug!(key, error = %err, "cache write skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_boundaries() {
        let now = Utc::now();
        let entry = CacheEntry::new("k", CacheCategory::Regulation, Value::Null, now);
        let ttl = to_chrono(CacheCategory::Regulation.ttl());
        let window = to_chrono(CacheCategory::Regulation.stale_window());
        assert_eq!(entry.freshness(now), Freshness::Fresh);
        assert_eq!(entry.freshness(now + ttl), Freshness::Stale);
        assert_eq!(entry.freshness(now + ttl + window), Freshness::Expired);
    }

    #[test]
    fn category_names_round_trip() {
        for category in CacheCategory::ALL {
            assert_eq!(category.as_str().parse::<CacheCategory>().unwrap(), category);
        }
        assert!("structure-prediction".parse::<CacheCategory>().is_ok());
    }
}
