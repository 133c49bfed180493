use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;

use super::{PersistentStore, StoreError, Table};
use crate::cache::{CacheCategory, CacheEntry};
use crate::domain::Upstream;
use crate::metrics::{ApiMetric, CallStatus};
use crate::ratelimit::RateLimitState;
use crate::session::AuthSession;

/// JSON-file store: one directory per table, one file per record.
///
/// A table whose directory does not exist is reported as missing; only
/// [`FileStore::provision`] creates table directories.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: Utf8PathBuf,
}

impl FileStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn default_root() -> Option<Utf8PathBuf> {
        BaseDirs::new().and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-gene-aggregator"))
                .ok()
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn provision(&self) -> Result<(), StoreError> {
        for table in Table::ALL {
            fs::create_dir_all(self.table_dir(table).as_std_path()).map_err(io_err)?;
        }
        Ok(())
    }

    fn table_dir(&self, table: Table) -> Utf8PathBuf {
        self.root.join(table.as_str())
    }

    fn existing_table_dir(&self, table: Table) -> Result<Utf8PathBuf, StoreError> {
        let dir = self.table_dir(table);
        if !dir.as_std_path().is_dir() {
            return Err(StoreError::TableMissing(table));
        }
        Ok(dir)
    }

    fn record_path(&self, table: Table, key: &str) -> Result<Utf8PathBuf, StoreError> {
        let dir = self.existing_table_dir(table)?;
        Ok(dir.join(format!("{}.json", encode_key(key))))
    }

    fn read_record<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<Option<T>, StoreError> {
        match fs::read(path.as_std_path()) {
            Ok(content) => serde_json::from_slice(&content)
                .map(Some)
                .map_err(|err| StoreError::Serde(format!("{path}: {err}"))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(err)),
        }
    }

    fn write_record<T: Serialize>(&self, path: &Utf8Path, record: &T) -> Result<(), StoreError> {
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::Io(format!("invalid record path {path}")))?;
        let content =
            serde_json::to_vec_pretty(record).map_err(|err| StoreError::Serde(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("kira-ga-record")
            .tempfile_in(parent.as_std_path())
            .map_err(io_err)?;
        io::Write::write_all(&mut temp, &content).map_err(io_err)?;
        temp.persist(path.as_std_path())
            .map_err(|err| StoreError::Io(err.to_string()))?;
        Ok(())
    }

    fn read_all<T: DeserializeOwned>(&self, dir: &Utf8Path) -> Result<Vec<T>, StoreError> {
        let entries = match fs::read_dir(dir.as_std_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(err)),
        };
        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err)?.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                let content = fs::read(&path).map_err(io_err)?;
                match serde_json::from_slice(&content) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping corrupt record");
                    }
                }
            }
        }
        Ok(records)
    }

    fn metrics_dir(&self, api: Upstream) -> Result<Utf8PathBuf, StoreError> {
        Ok(self.existing_table_dir(Table::Metrics)?.join(api.as_str()))
    }
}

impl PersistentStore for FileStore {
    fn get_rate_limit(&self, api: Upstream) -> Result<Option<RateLimitState>, StoreError> {
        let path = self.record_path(Table::RateLimits, api.as_str())?;
        self.read_record(&path)
    }

    fn put_rate_limit(&self, state: &RateLimitState) -> Result<(), StoreError> {
        let path = self.record_path(Table::RateLimits, state.api.as_str())?;
        self.write_record(&path, state)
    }

    fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let path = self.record_path(Table::Cache, key)?;
        self.read_record(&path)
    }

    fn put_cache(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        let path = self.record_path(Table::Cache, &entry.key)?;
        self.write_record(&path, entry)
    }

    fn delete_cache(&self, key: &str) -> Result<(), StoreError> {
        let path = self.record_path(Table::Cache, key)?;
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(err)),
        }
    }

    fn list_cache_keys(&self, category: CacheCategory) -> Result<Vec<String>, StoreError> {
        let dir = self.existing_table_dir(Table::Cache)?;
        let mut keys = self
            .read_all::<CacheEntry>(&dir)?
            .into_iter()
            .filter(|entry| entry.category == category)
            .map(|entry| entry.key)
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }

    fn insert_metric(&self, metric: &ApiMetric) -> Result<(), StoreError> {
        let dir = self.metrics_dir(metric.api)?;
        fs::create_dir_all(dir.as_std_path()).map_err(io_err)?;
        let name = format!(
            "{}-{}.json",
            metric.timestamp.timestamp_millis(),
            uuid::Uuid::new_v4().simple()
        );
        self.write_record(&dir.join(name), metric)
    }

    fn count_metrics(
        &self,
        api: Upstream,
        statuses: &[CallStatus],
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let count = self
            .list_metrics(api, since)?
            .iter()
            .filter(|metric| statuses.contains(&metric.status))
            .count();
        Ok(count as u64)
    }

    fn list_metrics(
        &self,
        api: Upstream,
        since: DateTime<Utc>,
    ) -> Result<Vec<ApiMetric>, StoreError> {
        let dir = self.metrics_dir(api)?;
        let mut metrics = self
            .read_all::<ApiMetric>(&dir)?
            .into_iter()
            .filter(|metric| metric.timestamp >= since)
            .collect::<Vec<_>>();
        metrics.sort_by_key(|metric| metric.timestamp);
        Ok(metrics)
    }

    fn get_session(&self, id: &str) -> Result<Option<AuthSession>, StoreError> {
        let path = self.record_path(Table::Sessions, id)?;
        self.read_record(&path)
    }

    fn put_session(&self, id: &str, session: &AuthSession) -> Result<(), StoreError> {
        let path = self.record_path(Table::Sessions, id)?;
        self.write_record(&path, session)
    }
}

/// Maps an arbitrary key onto a portable file stem.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("_{byte:02x}"));
        }
    }
    encoded
}

fn io_err(err: io::Error) -> StoreError {
    StoreError::Io(err.to_string())
}
