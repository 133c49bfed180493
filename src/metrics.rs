//! Call outcome recording and error-rate alerting.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Upstream;
use crate::error::KiraError;
use crate::runtime::{Clock, lock, to_chrono};
use crate::store::PersistentStore;

/// Failures per upstream tolerated inside one window before alerting.
pub const ERROR_THRESHOLD: u64 = 10;
pub const ERROR_WINDOW: Duration = Duration::from_secs(60 * 60);

const FAILURE_STATUSES: [CallStatus; 2] = [CallStatus::Error, CallStatus::Timeout];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Error,
    Timeout,
    RateLimited,
}

impl CallStatus {
    pub fn classify(err: &KiraError) -> Self {
        match err {
            KiraError::UpstreamTimeout { .. } => CallStatus::Timeout,
            KiraError::RateLimited { .. } => CallStatus::RateLimited,
            _ => CallStatus::Error,
        }
    }

    pub fn is_failure(self) -> bool {
        FAILURE_STATUSES.contains(&self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMetric {
    pub api: Upstream,
    pub endpoint: String,
    pub status: CallStatus,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRateAlert {
    pub api: Upstream,
    pub failures: u64,
    pub threshold: u64,
    pub window: Duration,
}

pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &ErrorRateAlert);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: &ErrorRateAlert) {
        tracing::error!(
            api = %alert.api,
            failures = alert.failures,
            threshold = alert.threshold,
            window_secs = alert.window.as_secs(),
            "upstream error rate above threshold"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub api: String,
    pub total: u64,
    pub success: u64,
    pub error: u64,
    pub timeout: u64,
    pub rate_limited: u64,
    pub cache_hits: u64,
    pub error_rate: f64,
    pub avg_latency_ms: Option<u64>,
}

pub struct MetricsMonitor {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertSink>,
    last_alert: Mutex<HashMap<Upstream, DateTime<Utc>>>,
    recent_failures: Mutex<HashMap<Upstream, VecDeque<DateTime<Utc>>>>,
}

impl MetricsMonitor {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            store,
            clock,
            alerts,
            last_alert: Mutex::new(HashMap::new()),
            recent_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `call`, recording its latency and outcome. The result is passed
    /// through untouched.
    pub fn with_metrics<T, F>(&self, api: Upstream, endpoint: &str, call: F) -> Result<T, KiraError>
    where
        F: FnOnce() -> Result<T, KiraError>,
    {
        let started = Instant::now();
        let result = call();
        let latency_ms = started.elapsed().as_millis() as u64;
        let (status, error_message) = match &result {
            Ok(_) => (CallStatus::Success, None),
            Err(err) => (CallStatus::classify(err), Some(err.to_string())),
        };
        self.record(ApiMetric {
            api,
            endpoint: endpoint.to_string(),
            status,
            latency_ms,
            cache_hit: false,
            error_message,
            timestamp: self.clock.now(),
        });
        result
    }

    pub fn record_cache_hit(&self, api: Upstream, endpoint: &str) {
        self.record(ApiMetric {
            api,
            endpoint: endpoint.to_string(),
            status: CallStatus::Success,
            latency_ms: 0,
            cache_hit: true,
            error_message: None,
            timestamp: self.clock.now(),
        });
    }

    pub fn record(&self, metric: ApiMetric) {
        if metric.status.is_failure() {
            tracing::debug!(
                api = %metric.api,
                endpoint = %metric.endpoint,
                status = ?metric.status,
                latency_ms = metric.latency_ms,
                error = metric.error_message.as_deref().unwrap_or(""),
                "upstream call failed"
            );
        }
        if let Err(err) = self.store.insert_metric(&metric) {
            tracing::debug!(api = %metric.api, error = %err, "metric not persisted");
        }
        if metric.status.is_failure() {
            self.remember_failure(metric.api, metric.timestamp);
            self.check_error_rate(metric.api);
        }
    }

    pub fn summary(&self, api: Upstream, window: Duration) -> MetricsSummary {
        let since = self.clock.now() - to_chrono(window);
        let metrics = match self.store.list_metrics(api, since) {
            Ok(metrics) => metrics,
            Err(err) => {
                tracing::debug!(api = %api, error = %err, "metrics unavailable");
                Vec::new()
            }
        };
        summarize(api, &metrics)
    }

    fn remember_failure(&self, api: Upstream, at: DateTime<Utc>) {
        let cutoff = self.clock.now() - to_chrono(ERROR_WINDOW);
        let mut recent = lock(&self.recent_failures);
        let failures = recent.entry(api).or_default();
        failures.push_back(at);
        while failures.front().is_some_and(|ts| *ts < cutoff) {
            failures.pop_front();
        }
    }

    fn check_error_rate(&self, api: Upstream) {
        let now = self.clock.now();
        let since = now - to_chrono(ERROR_WINDOW);
        let failures = match self.store.count_metrics(api, &FAILURE_STATUSES, since) {
            Ok(count) => count,
            Err(_) => lock(&self.recent_failures)
                .get(&api)
                .map(|failures| failures.iter().filter(|ts| **ts >= since).count() as u64)
                .unwrap_or(0),
        };
        // Only the record that crosses the threshold alerts, so separate
        // processes counting through one store emit a single alert.
        if failures != ERROR_THRESHOLD + 1 {
            return;
        }

        {
            let mut last_alert = lock(&self.last_alert);
            if last_alert.get(&api).is_some_and(|at| *at > since) {
                return;
            }
            last_alert.insert(api, now);
        }
        self.alerts.alert(&ErrorRateAlert {
            api,
            failures,
            threshold: ERROR_THRESHOLD,
            window: ERROR_WINDOW,
        });
    }
}

fn summarize(api: Upstream, metrics: &[ApiMetric]) -> MetricsSummary {
    let mut summary = MetricsSummary {
        api: api.to_string(),
        ..MetricsSummary::default()
    };
    let mut latency_total = 0u64;
    let mut latency_samples = 0u64;
    for metric in metrics {
        summary.total += 1;
        match metric.status {
            CallStatus::Success => summary.success += 1,
            CallStatus::Error => summary.error += 1,
            CallStatus::Timeout => summary.timeout += 1,
            CallStatus::RateLimited => summary.rate_limited += 1,
        }
        if metric.cache_hit {
            summary.cache_hits += 1;
        } else {
            latency_total += metric.latency_ms;
            latency_samples += 1;
        }
    }
    if summary.total > 0 {
        summary.error_rate = (summary.error + summary.timeout) as f64 / summary.total as f64;
    }
    if latency_samples > 0 {
        summary.avg_latency_ms = Some(latency_total / latency_samples);
    }
    summary
}
