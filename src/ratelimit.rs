//! Per-upstream token bucket with persisted state.
//!
//! Bucket state is read from and written to the persisted store on every call
//! so separate processes share one budget on a best-effort basis. When the
//! store is unavailable the limiter keeps working from its in-process copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Upstream;
use crate::error::KiraError;
use crate::runtime::{Clock, elapsed_secs, lock};
use crate::store::PersistentStore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst_limit: f64,
    pub timeout_ms: u64,
    pub requires_auth: bool,
}

impl RateLimitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Partial override read from the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitOverride {
    #[serde(default)]
    pub requests_per_second: Option<f64>,
    #[serde(default)]
    pub burst_limit: Option<f64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitTable {
    configs: BTreeMap<Upstream, RateLimitConfig>,
}

impl Default for RateLimitTable {
    fn default() -> Self {
        let configs = Upstream::ALL
            .into_iter()
            .map(|api| (api, default_config(api)))
            .collect();
        Self { configs }
    }
}

impl RateLimitTable {
    pub fn get(&self, api: Upstream) -> RateLimitConfig {
        self.configs
            .get(&api)
            .copied()
            .unwrap_or_else(|| default_config(api))
    }

    pub fn with_config(mut self, api: Upstream, config: RateLimitConfig) -> Self {
        self.configs.insert(api, config);
        self
    }

    pub fn with_override(self, api: Upstream, value: RateLimitOverride) -> Self {
        let mut config = self.get(api);
        if let Some(rps) = value.requests_per_second.filter(|rps| *rps > 0.0) {
            config.requests_per_second = rps;
        }
        if let Some(burst) = value.burst_limit.filter(|burst| *burst >= 1.0) {
            config.burst_limit = burst;
        }
        if let Some(timeout_ms) = value.timeout_ms.filter(|ms| *ms > 0) {
            config.timeout_ms = timeout_ms;
        }
        self.with_config(api, config)
    }

    /// Raises the request rate of the upstreams that accept an elevated-rate
    /// credential. Only applied once while the configuration is resolved.
    pub fn with_elevated_rate(mut self) -> Self {
        for (api, config) in self.configs.iter_mut() {
            if api.supports_elevated_rate() {
                config.requests_per_second = config.requests_per_second.max(elevated_rate(*api));
            }
        }
        self
    }
}

fn default_config(api: Upstream) -> RateLimitConfig {
    let (requests_per_second, burst_limit, timeout_ms, requires_auth) = match api {
        Upstream::Ncbi => (3.0, 3.0, 10_000, false),
        Upstream::Uniprot => (5.0, 10.0, 15_000, false),
        Upstream::AlphaFold => (5.0, 5.0, 10_000, false),
        Upstream::Pdb => (5.0, 10.0, 15_000, false),
        Upstream::String => (1.0, 2.0, 10_000, false),
        Upstream::BioCyc => (2.0, 2.0, 20_000, true),
    };
    RateLimitConfig {
        requests_per_second,
        burst_limit,
        timeout_ms,
        requires_auth,
    }
}

fn elevated_rate(api: Upstream) -> f64 {
    match api {
        Upstream::BioCyc => 5.0,
        _ => 10.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub api: Upstream,
    pub tokens: f64,
    pub last_refill: DateTime<Utc>,
}

impl RateLimitState {
    pub fn full(api: Upstream, config: &RateLimitConfig, now: DateTime<Utc>) -> Self {
        Self {
            api,
            tokens: config.burst_limit,
            last_refill: now,
        }
    }

    pub fn refill(&mut self, config: &RateLimitConfig, now: DateTime<Utc>) {
        let elapsed = elapsed_secs(self.last_refill, now);
        self.tokens = (self.tokens + elapsed * config.requests_per_second)
            .clamp(0.0, config.burst_limit);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Time until one whole token is available.
    pub fn wait_for_token(&self, config: &RateLimitConfig) -> Duration {
        if self.tokens >= 1.0 || config.requests_per_second <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / config.requests_per_second)
    }

    pub fn consume(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }
}

type Slot = Arc<Mutex<Option<RateLimitState>>>;

pub struct RateLimiter {
    table: RateLimitTable,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<Upstream, Slot>>,
    store_degraded: AtomicBool,
}

impl RateLimiter {
    pub fn new(
        table: RateLimitTable,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table,
            store,
            clock,
            slots: Mutex::new(HashMap::new()),
            store_degraded: AtomicBool::new(false),
        }
    }

    pub fn config(&self, api: Upstream) -> RateLimitConfig {
        self.table.get(api)
    }

    /// Reserves one token for `api`, then runs `call` with the upstream's
    /// deadline. Waits instead of rejecting when the bucket is empty.
    pub fn run_with_limit<T, F>(&self, api: Upstream, call: F) -> Result<T, KiraError>
    where
        F: FnOnce(Duration) -> Result<T, KiraError>,
    {
        let config = self.table.get(api);
        self.acquire(api, &config);
        call(config.timeout())
    }

    /// Current bucket state after refill, without consuming a token.
    pub fn peek(&self, api: Upstream) -> RateLimitState {
        let config = self.table.get(api);
        let slot = self.slot(api);
        let guard = lock(&slot);
        let now = self.clock.now();
        let mut state = self.load(api, &config, guard.as_ref(), now);
        state.refill(&config, now);
        state
    }

    fn acquire(&self, api: Upstream, config: &RateLimitConfig) {
        let slot = self.slot(api);
        // Held across the wait so callers to the same upstream queue up.
        let mut guard = lock(&slot);
        let now = self.clock.now();
        let mut state = self.load(api, config, guard.as_ref(), now);
        state.refill(config, now);

        let wait = state.wait_for_token(config);
        if !wait.is_zero() {
            tracing::debug!(
                api = %api,
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting for token"
            );
            self.clock.sleep(wait);
            state.refill(config, self.clock.now());
            if state.tokens < 1.0 {
                state.tokens = 1.0_f64.min(config.burst_limit);
            }
        }
        state.consume();

        if let Err(err) = self.store.put_rate_limit(&state) {
            self.note_degraded(api, &err.to_string());
        }
        *guard = Some(state);
    }

    fn load(
        &self,
        api: Upstream,
        config: &RateLimitConfig,
        local: Option<&RateLimitState>,
        now: DateTime<Utc>,
    ) -> RateLimitState {
        let persisted = match self.store.get_rate_limit(api) {
            Ok(state) => state,
            Err(err) => {
                self.note_degraded(api, &err.to_string());
                None
            }
        };
        let mut state = persisted
            .or_else(|| local.cloned())
            .unwrap_or_else(|| RateLimitState::full(api, config, now));
        state.tokens = state.tokens.clamp(0.0, config.burst_limit);
        state
    }

    fn slot(&self, api: Upstream) -> Slot {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(api).or_default())
    }

    fn note_degraded(&self, api: Upstream, reason: &str) {
        if !self.store_degraded.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                api = %api,
                reason,
                "rate limit store unavailable, using in-process buckets"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ManualClock;
    use crate::store::{MemoryStore, Table};

    fn limiter(store: MemoryStore, clock: &ManualClock) -> RateLimiter {
        let table = RateLimitTable::default().with_config(
            Upstream::String,
            RateLimitConfig {
                requests_per_second: 2.0,
                burst_limit: 4.0,
                timeout_ms: 1_000,
                requires_auth: false,
            },
        );
        RateLimiter::new(table, Arc::new(store), Arc::new(clock.clone()))
    }

    #[test]
    fn new_bucket_starts_full() {
        let clock = ManualClock::new(Utc::now());
        let limiter = limiter(MemoryStore::new(), &clock);
        assert_eq!(limiter.peek(Upstream::String).tokens, 4.0);
    }

    #[test]
    fn empty_bucket_delays_instead_of_rejecting() {
        let clock = ManualClock::new(Utc::now());
        let limiter = limiter(MemoryStore::new(), &clock);
        for _ in 0..4 {
            limiter.run_with_limit(Upstream::String, |_| Ok(())).unwrap();
        }
        assert_eq!(clock.slept(), Duration::ZERO);

        limiter.run_with_limit(Upstream::String, |_| Ok(())).unwrap();
        assert_eq!(clock.slept(), Duration::from_millis(500));
        assert_eq!(limiter.peek(Upstream::String).tokens, 0.0);
    }

    #[test]
    fn deadline_comes_from_config() {
        let clock = ManualClock::new(Utc::now());
        let limiter = limiter(MemoryStore::new(), &clock);
        let deadline = limiter
            .run_with_limit(Upstream::String, Ok)
            .unwrap();
        assert_eq!(deadline, Duration::from_millis(1_000));
    }

    #[test]
    fn missing_table_falls_back_to_process_state() {
        let clock = ManualClock::new(Utc::now());
        let limiter = limiter(MemoryStore::new().without_table(Table::RateLimits), &clock);
        for _ in 0..3 {
            limiter.run_with_limit(Upstream::String, |_| Ok(())).unwrap();
        }
        assert_eq!(limiter.peek(Upstream::String).tokens, 1.0);
    }

    #[test]
    fn elevated_rate_only_touches_supported_upstreams() {
        let table = RateLimitTable::default().with_elevated_rate();
        assert_eq!(table.get(Upstream::Ncbi).requests_per_second, 10.0);
        assert_eq!(table.get(Upstream::Ncbi).burst_limit, 3.0);
        assert_eq!(table.get(Upstream::Uniprot).requests_per_second, 5.0);
    }
}
