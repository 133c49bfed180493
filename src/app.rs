use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::adapter::AdapterContext;
use crate::alphafold::{AlphaFoldAdapter, AlphaFoldHttpClient};
use crate::biocyc::{BioCycAdapter, BioCycHttpClient, PtoolsXmlParser, RegulationSummary};
use crate::cache::{CacheCategory, CacheManager};
use crate::config::ResolvedConfig;
use crate::domain::{GeneRequest, Upstream};
use crate::envelope::ErrorEnvelope;
use crate::error::KiraError;
use crate::fragment::GeneSummary;
use crate::metrics::{MetricsMonitor, MetricsSummary, TracingAlertSink};
use crate::ncbi::{NcbiAdapter, NcbiHttpClient};
use crate::orchestrator::{Orchestrator, SummaryAdapters};
use crate::ratelimit::RateLimiter;
use crate::rcsb::{PdbAdapter, PdbHttpClient};
use crate::runtime::{Clock, SystemClock, ThreadSpawner};
use crate::session::{BioCycLoginClient, SessionManager};
use crate::store::{FileStore, MemoryStore, PersistentStore};
use crate::string_db::{StringAdapter, StringHttpClient};
use crate::uniprot::{UniprotAdapter, UniprotHttpClient};

#[derive(Debug, Clone, Serialize)]
pub struct StatsResult {
    pub window_minutes: u64,
    pub upstreams: Vec<MetricsSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurgeResult {
    pub category: CacheCategory,
    pub removed: usize,
}

/// Opens the persisted store the process shares state through. The file
/// store is provisioned on first use; a failure there leaves every
/// component in bypass mode rather than aborting.
pub fn open_store(config: &ResolvedConfig, in_memory: bool) -> Result<Arc<dyn PersistentStore>, KiraError> {
    if in_memory {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let root = config
        .store_dir
        .clone()
        .or_else(FileStore::default_root)
        .ok_or_else(|| KiraError::Store("unable to resolve store directory".to_string()))?;
    let store = FileStore::new(root);
    if let Err(err) = store.provision() {
        tracing::warn!(root = %store.root(), error = %err, "store not provisioned, running without persistence");
    }
    Ok(Arc::new(store))
}

pub struct App {
    orchestrator: Orchestrator,
    context: AdapterContext,
}

impl App {
    pub fn new(orchestrator: Orchestrator, context: AdapterContext) -> Self {
        Self {
            orchestrator,
            context,
        }
    }

    /// Wires the production adapters over `store`.
    pub fn from_config(config: &ResolvedConfig, store: Arc<dyn PersistentStore>) -> Result<Self, KiraError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limits.clone(),
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let cache = CacheManager::new(Arc::clone(&store), Arc::clone(&clock), Arc::new(ThreadSpawner));
        let metrics = Arc::new(MetricsMonitor::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::new(TracingAlertSink),
        ));
        let context = AdapterContext::new(Arc::clone(&limiter), cache, metrics);

        let adapters = SummaryAdapters {
            genomic: Arc::new(NcbiAdapter::new(
                Arc::new(NcbiHttpClient::new(config.credentials.elevated_rate_key.clone())?),
                context.clone(),
            )),
            protein: Arc::new(UniprotAdapter::new(
                Arc::new(UniprotHttpClient::new()?),
                context.clone(),
            )),
            prediction: Arc::new(AlphaFoldAdapter::new(
                Arc::new(AlphaFoldHttpClient::new()?),
                context.clone(),
            )),
            experimental: Arc::new(PdbAdapter::new(Arc::new(PdbHttpClient::new()?), context.clone())),
            interactions: Arc::new(StringAdapter::new(
                Arc::new(StringHttpClient::new()?),
                context.clone(),
            )),
        };

        let login_timeout = limiter.config(Upstream::BioCyc).timeout();
        let sessions = Arc::new(SessionManager::new(
            Arc::new(BioCycLoginClient::new(login_timeout)?),
            config.credentials.biocyc.clone(),
            Arc::clone(&store),
            Arc::clone(&clock),
        ));
        let regulation = Arc::new(BioCycAdapter::new(
            Arc::new(BioCycHttpClient::new()?),
            sessions,
            Arc::new(PtoolsXmlParser::new()?),
            context.clone(),
            Arc::clone(&clock),
        ));

        let orchestrator = Orchestrator::new(adapters, clock).with_regulation(regulation);
        Ok(Self::new(orchestrator, context))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn summary(&self, request: &GeneRequest) -> Result<GeneSummary, ErrorEnvelope> {
        self.orchestrator.handle(request)
    }

    pub fn regulation(&self, request: &GeneRequest) -> Result<RegulationSummary, ErrorEnvelope> {
        self.orchestrator.handle_regulation(request)
    }

    pub fn stats(&self, window: Duration) -> StatsResult {
        let upstreams = Upstream::ALL
            .into_iter()
            .map(|api| self.context.metrics().summary(api, window))
            .collect();
        StatsResult {
            window_minutes: window.as_secs() / 60,
            upstreams,
        }
    }

    pub fn purge(&self, category: CacheCategory) -> PurgeResult {
        let removed = self.context.cache().purge_category(category);
        tracing::info!(%category, removed, "cache category purged");
        PurgeResult { category, removed }
    }
}
