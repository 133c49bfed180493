//! Fan-out over the registries for one gene request.
//!
//! The genomic and protein registries are asked first and concurrently. At
//! least one of them must answer; the structure and interaction registries
//! are only asked afterwards, with the protein accession, and never fail the
//! request.

use std::sync::Arc;
use std::thread;

use crate::adapter::{FragmentQuery, SourceAdapter};
use crate::biocyc::{BioCycAdapter, RegulationSummary};
use crate::domain::{GeneRequest, GeneSymbol, Organism};
use crate::envelope::{ErrorEnvelope, RequestId};
use crate::error::KiraError;
use crate::fragment::{GeneFragment, GeneSummary};
use crate::runtime::Clock;

/// The adapters a summary is built from, one per merge slot.
#[derive(Clone)]
pub struct SummaryAdapters {
    pub genomic: Arc<dyn SourceAdapter>,
    pub protein: Arc<dyn SourceAdapter>,
    pub prediction: Arc<dyn SourceAdapter>,
    pub experimental: Arc<dyn SourceAdapter>,
    pub interactions: Arc<dyn SourceAdapter>,
}

pub struct Orchestrator {
    adapters: SummaryAdapters,
    regulation: Option<Arc<BioCycAdapter>>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(adapters: SummaryAdapters, clock: Arc<dyn Clock>) -> Self {
        Self {
            adapters,
            regulation: None,
            clock,
        }
    }

    pub fn with_regulation(mut self, adapter: Arc<BioCycAdapter>) -> Self {
        self.regulation = Some(adapter);
        self
    }

    pub fn summarize(&self, request: &GeneRequest) -> Result<GeneSummary, KiraError> {
        let (symbol, organism) = resolve(request)?;
        let query = FragmentQuery::new(symbol, organism);

        let (genomic, protein) = thread::scope(|scope| {
            let genomic = scope.spawn(|| fetch_or_empty(self.adapters.genomic.as_ref(), &query));
            let protein = scope.spawn(|| fetch_or_empty(self.adapters.protein.as_ref(), &query));
            (join_fragment(genomic), join_fragment(protein))
        });

        if genomic.is_empty() && protein.is_empty() {
            return Err(KiraError::GeneNotFound {
                symbol: query.symbol.to_string(),
                organism: organism.name.to_string(),
            });
        }

        let query = query.with_uniprot_id(protein.uniprot_id.clone());
        let (prediction, experimental, interactions) = thread::scope(|scope| {
            let prediction =
                scope.spawn(|| fetch_or_empty(self.adapters.prediction.as_ref(), &query));
            let experimental =
                scope.spawn(|| fetch_or_empty(self.adapters.experimental.as_ref(), &query));
            let interactions =
                scope.spawn(|| fetch_or_empty(self.adapters.interactions.as_ref(), &query));
            (
                join_fragment(prediction),
                join_fragment(experimental),
                join_fragment(interactions),
            )
        });

        let fragments = vec![
            (self.adapters.genomic.upstream(), genomic),
            (self.adapters.protein.upstream(), protein),
            (self.adapters.prediction.upstream(), prediction),
            (self.adapters.experimental.upstream(), experimental),
            (self.adapters.interactions.upstream(), interactions),
        ];
        Ok(GeneSummary::assemble(
            query.symbol.as_str(),
            organism.name,
            organism.taxonomy,
            fragments,
            self.clock.now(),
        ))
    }

    /// Pathway and regulation data, fetched outside the summary fan-out.
    pub fn regulation(&self, request: &GeneRequest) -> Result<RegulationSummary, KiraError> {
        let adapter = self.regulation.as_ref().ok_or_else(|| {
            KiraError::InvalidRequest("regulation lookups are not enabled".to_string())
        })?;
        let (symbol, organism) = resolve(request)?;
        adapter.regulation(&FragmentQuery::new(symbol, organism))
    }

    /// Request boundary: failures are classified, tagged with a request id
    /// and logged before they leave.
    pub fn handle(&self, request: &GeneRequest) -> Result<GeneSummary, ErrorEnvelope> {
        boundary("summary", request, || self.summarize(request))
    }

    pub fn handle_regulation(&self, request: &GeneRequest) -> Result<RegulationSummary, ErrorEnvelope> {
        boundary("regulation", request, || self.regulation(request))
    }
}

fn resolve(request: &GeneRequest) -> Result<(GeneSymbol, &'static Organism), KiraError> {
    let symbol = request.symbol.parse::<GeneSymbol>()?;
    Ok((symbol, Organism::resolve(&request.organism)))
}

fn boundary<T>(
    operation: &'static str,
    request: &GeneRequest,
    call: impl FnOnce() -> Result<T, KiraError>,
) -> Result<T, ErrorEnvelope> {
    let request_id = RequestId::new();
    let span = tracing::info_span!(
        "request",
        %request_id,
        operation,
        symbol = %request.symbol,
        organism = %request.organism
    );
    let _guard = span.enter();
    call().map_err(|err| {
        let envelope = ErrorEnvelope::from_error(&err, request_id);
        tracing::error!(
            %request_id,
            code = %envelope.error.code,
            upstream = ?err.upstream(),
            error = %err,
            "request failed"
        );
        envelope
    })
}

fn fetch_or_empty(adapter: &dyn SourceAdapter, query: &FragmentQuery) -> GeneFragment {
    match adapter.fetch(query) {
        Ok(fragment) => fragment,
        Err(err) => {
            tracing::warn!(
                api = %adapter.upstream(),
                symbol = %query.symbol,
                error = %err,
                "adapter failed, continuing without it"
            );
            GeneFragment::default()
        }
    }
}

fn join_fragment(handle: thread::ScopedJoinHandle<'_, GeneFragment>) -> GeneFragment {
    handle.join().unwrap_or_else(|_| {
        tracing::error!("adapter thread panicked");
        GeneFragment::default()
    })
}
