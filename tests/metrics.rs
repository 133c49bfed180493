mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;

use kira_gene_aggregator::domain::Upstream;
use kira_gene_aggregator::error::KiraError;
use kira_gene_aggregator::metrics::{
    AlertSink, ERROR_THRESHOLD, ErrorRateAlert, MetricsMonitor,
};
use kira_gene_aggregator::runtime::ManualClock;
use kira_gene_aggregator::store::MemoryStore;

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<ErrorRateAlert>>,
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

impl AlertSink for RecordingSink {
    fn alert(&self, alert: &ErrorRateAlert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

struct Setup {
    monitor: MetricsMonitor,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
}

fn setup() -> Setup {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(common::start()));
    let sink = Arc::new(RecordingSink::default());
    let monitor = MetricsMonitor::new(store.clone(), clock.clone(), sink.clone());
    Setup {
        monitor,
        sink,
        clock,
        store,
    }
}

fn fail(monitor: &MetricsMonitor, api: Upstream) {
    let result: Result<(), KiraError> = monitor.with_metrics(api, "search", || {
        Err(KiraError::UpstreamHttp {
            api,
            message: "connection reset".to_string(),
        })
    });
    assert!(result.is_err());
}

#[test]
fn eleven_failures_in_an_hour_alert_once() {
    let setup = setup();
    for _ in 0..ERROR_THRESHOLD {
        fail(&setup.monitor, Upstream::String);
        setup.clock.advance(Duration::from_secs(60));
    }
    assert_eq!(setup.sink.count(), 0);

    fail(&setup.monitor, Upstream::String);
    assert_eq!(setup.sink.count(), 1);

    fail(&setup.monitor, Upstream::String);
    fail(&setup.monitor, Upstream::String);
    assert_eq!(setup.sink.count(), 1);

    let alert = setup.sink.alerts.lock().unwrap()[0].clone();
    assert_eq!(alert.api, Upstream::String);
    assert_eq!(alert.failures, ERROR_THRESHOLD + 1);
}

#[test]
fn alerts_are_per_upstream_and_per_window() {
    let setup = setup();
    for _ in 0..=ERROR_THRESHOLD {
        fail(&setup.monitor, Upstream::String);
    }
    for _ in 0..=ERROR_THRESHOLD {
        fail(&setup.monitor, Upstream::Pdb);
    }
    assert_eq!(setup.sink.count(), 2);

    setup.clock.advance(Duration::from_secs(61 * 60));
    for _ in 0..ERROR_THRESHOLD {
        fail(&setup.monitor, Upstream::String);
    }
    assert_eq!(setup.sink.count(), 2);
    fail(&setup.monitor, Upstream::String);
    assert_eq!(setup.sink.count(), 3);
}

#[test]
fn successes_and_rate_limits_do_not_count_as_failures() {
    let setup = setup();
    for _ in 0..20 {
        let _: Result<(), KiraError> = setup.monitor.with_metrics(Upstream::Ncbi, "esearch", || {
            Err(KiraError::RateLimited {
                api: Upstream::Ncbi,
                retry_after: None,
            })
        });
        setup
            .monitor
            .with_metrics(Upstream::Ncbi, "esearch", || Ok(()))
            .unwrap();
    }
    assert_eq!(setup.sink.count(), 0);

    let summary = setup.monitor.summary(Upstream::Ncbi, Duration::from_secs(3600));
    assert_eq!(summary.total, 40);
    assert_eq!(summary.rate_limited, 20);
    assert_eq!(summary.success, 20);
    assert_eq!(summary.error_rate, 0.0);
}

#[test]
fn errors_pass_through_unchanged() {
    let setup = setup();
    let err = setup
        .monitor
        .with_metrics::<(), _>(Upstream::Pdb, "entry", || {
            Err(KiraError::UpstreamTimeout {
                api: Upstream::Pdb,
                timeout_ms: 15_000,
            })
        })
        .unwrap_err();
    assert_matches!(err, KiraError::UpstreamTimeout { timeout_ms: 15_000, .. });

    let summary = setup.monitor.summary(Upstream::Pdb, Duration::from_secs(3600));
    assert_eq!(summary.timeout, 1);
    assert_eq!(setup.store.metric_count(), 1);
}

#[test]
fn store_outage_keeps_alerting_from_memory() {
    let setup = setup();
    setup.store.set_unavailable(true);

    let value = setup
        .monitor
        .with_metrics(Upstream::Uniprot, "search", || Ok(7))
        .unwrap();
    assert_eq!(value, 7);

    for _ in 0..=ERROR_THRESHOLD {
        fail(&setup.monitor, Upstream::Uniprot);
    }
    assert_eq!(setup.sink.count(), 1);
    assert_eq!(setup.store.metric_count(), 0);
}

#[test]
fn cache_hits_are_recorded_without_latency() {
    let setup = setup();
    setup.monitor.record_cache_hit(Upstream::AlphaFold, "prediction");
    setup
        .monitor
        .with_metrics(Upstream::AlphaFold, "prediction", || Ok(()))
        .unwrap();

    let summary = setup
        .monitor
        .summary(Upstream::AlphaFold, Duration::from_secs(3600));
    assert_eq!(summary.total, 2);
    assert_eq!(summary.cache_hits, 1);
    assert!(summary.avg_latency_ms.is_some());
}

#[test]
fn monitors_sharing_a_store_alert_once() {
    let setup = setup();
    for _ in 0..=ERROR_THRESHOLD {
        fail(&setup.monitor, Upstream::Uniprot);
    }
    assert_eq!(setup.sink.count(), 1);

    for _ in 0..2 {
        setup.clock.advance(Duration::from_secs(60));
        let next = MetricsMonitor::new(setup.store.clone(), setup.clock.clone(), setup.sink.clone());
        fail(&next, Upstream::Uniprot);
    }
    assert_eq!(setup.sink.count(), 1);
}
