mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use kira_gene_aggregator::adapter::{AdapterContext, FragmentQuery, SourceAdapter, cache_key};
use kira_gene_aggregator::app::{App, open_store};
use kira_gene_aggregator::cache::{CacheCategory, CacheManager};
use kira_gene_aggregator::config::{Config, ConfigLoader, ENV_STORE_DIR, ResolvedConfig};
use kira_gene_aggregator::domain::{GeneRequest, Upstream};
use kira_gene_aggregator::error::KiraError;
use kira_gene_aggregator::fragment::GeneFragment;
use kira_gene_aggregator::metrics::{MetricsMonitor, TracingAlertSink};
use kira_gene_aggregator::orchestrator::{Orchestrator, SummaryAdapters};
use kira_gene_aggregator::output::JsonOutput;
use kira_gene_aggregator::ratelimit::{RateLimitTable, RateLimiter};
use kira_gene_aggregator::runtime::{DeferredSpawner, ManualClock};
use kira_gene_aggregator::store::PersistentStore;

/// Adapter that answers through the shared context and counts upstream hits.
struct MockRegistry {
    api: Upstream,
    ctx: AdapterContext,
    calls: Arc<AtomicUsize>,
}

impl SourceAdapter for MockRegistry {
    fn upstream(&self) -> Upstream {
        self.api
    }

    fn fetch(&self, query: &FragmentQuery) -> Result<GeneFragment, KiraError> {
        let calls = Arc::clone(&self.calls);
        let symbol = query.symbol.to_string();
        let key = cache_key(self.api, "lookup", &[&symbol]);
        let description: String = self.ctx.call(
            self.api,
            "lookup",
            key,
            CacheCategory::GeneRecord,
            move |_deadline| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{symbol} record"))
            },
        )?;
        Ok(GeneFragment {
            description: Some(description),
            ..GeneFragment::default()
        })
    }
}

fn config_for(dir: &TempDir) -> ResolvedConfig {
    let root = Utf8PathBuf::from_path_buf(dir.path().join("store")).unwrap();
    ConfigLoader::resolve_with_env(Config::default(), |name| {
        (name == ENV_STORE_DIR).then(|| root.to_string())
    })
    .unwrap()
}

fn app_over(store: Arc<dyn PersistentStore>, calls: &Arc<AtomicUsize>) -> App {
    let clock = Arc::new(ManualClock::new(common::start()));
    let context = AdapterContext::new(
        Arc::new(RateLimiter::new(
            RateLimitTable::default(),
            Arc::clone(&store),
            clock.clone(),
        )),
        CacheManager::new(Arc::clone(&store), clock.clone(), Arc::new(DeferredSpawner::new())),
        Arc::new(MetricsMonitor::new(
            Arc::clone(&store),
            clock.clone(),
            Arc::new(TracingAlertSink),
        )),
    );
    let registry = |api: Upstream| -> Arc<dyn SourceAdapter> {
        Arc::new(MockRegistry {
            api,
            ctx: context.clone(),
            calls: Arc::clone(calls),
        })
    };
    let adapters = SummaryAdapters {
        genomic: registry(Upstream::Ncbi),
        protein: registry(Upstream::Uniprot),
        prediction: registry(Upstream::AlphaFold),
        experimental: registry(Upstream::Pdb),
        interactions: registry(Upstream::String),
    };
    App::new(Orchestrator::new(adapters, clock), context)
}

#[test]
fn file_store_shares_cache_between_processes() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let request = GeneRequest::new("dnaA", "Escherichia coli");

    let first_calls = Arc::new(AtomicUsize::new(0));
    let first = app_over(open_store(&config, false).unwrap(), &first_calls);
    let summary = first.summary(&request).unwrap();
    assert_eq!(summary.details.description.as_deref(), Some("dnaA record"));
    assert_eq!(first_calls.load(Ordering::SeqCst), 5);

    let second_calls = Arc::new(AtomicUsize::new(0));
    let second = app_over(open_store(&config, false).unwrap(), &second_calls);
    second.summary(&request).unwrap();
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);

    let stats = second.stats(Duration::from_secs(3600));
    let ncbi = stats.upstreams.iter().find(|s| s.api == "ncbi").unwrap();
    assert_eq!(ncbi.total, 2);
    assert_eq!(ncbi.cache_hits, 1);
    assert_eq!(stats.window_minutes, 60);
}

#[test]
fn purge_forces_a_refetch() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let calls = Arc::new(AtomicUsize::new(0));
    let app = app_over(open_store(&config, false).unwrap(), &calls);
    let request = GeneRequest::new("dnaA", "Escherichia coli");

    app.summary(&request).unwrap();
    let purged = app.purge(CacheCategory::GeneRecord);
    assert_eq!(purged.removed, 5);
    assert_eq!(app.purge(CacheCategory::Interactions).removed, 0);

    app.summary(&request).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}

#[test]
fn in_memory_store_is_not_persisted() {
    let dir = TempDir::new().unwrap();
    let config = config_for(&dir);
    let calls = Arc::new(AtomicUsize::new(0));
    let app = app_over(open_store(&config, true).unwrap(), &calls);
    app.summary(&GeneRequest::new("dnaA", "Escherichia coli"))
        .unwrap();
    assert!(!dir.path().join("store").exists());
}

#[test]
fn json_output_writes_envelopes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dir = TempDir::new().unwrap();
    let app = app_over(open_store(&config_for(&dir), true).unwrap(), &calls);
    let envelope = app
        .summary(&GeneRequest::new("not a symbol!", "Escherichia coli"))
        .unwrap_err();
    assert_eq!(envelope.error.code, "VALIDATION");
    JsonOutput::print_error(&envelope).unwrap();
}
