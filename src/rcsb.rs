//! Experimental structures: PDBe SIFTS mapping first, RCSB search as the
//! fallback, RCSB entry metadata for enrichment.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::adapter::{AdapterContext, FragmentQuery, SourceAdapter, cache_key};
use crate::cache::CacheCategory;
use crate::domain::Upstream;
use crate::error::KiraError;
use crate::fragment::{ExperimentalStructure, GeneFragment};
use crate::http::HttpClient;

/// Structures enriched with entry metadata per gene.
pub const MAX_ENRICHED: usize = 5;

const SIFTS_URL: &str = "https://www.ebi.ac.uk/pdbe/api/mappings/best_structures";
const SEARCH_URL: &str = "https://search.rcsb.org/rcsbsearch/v2/query";
const ENTRY_URL: &str = "https://data.rcsb.org/rest/v1/core/entry";

pub trait PdbClient: Send + Sync {
    /// PDBe best-structure mapping for a UniProt accession.
    fn best_structures(&self, accession: &str, deadline: Duration) -> Result<Value, KiraError>;
    /// RCSB full-text search on the reference sequence accession.
    fn search_by_accession(&self, accession: &str, deadline: Duration) -> Result<Value, KiraError>;
    /// RCSB core entry metadata.
    fn entry(&self, pdb_id: &str, deadline: Duration) -> Result<Value, KiraError>;
}

#[derive(Clone)]
pub struct PdbHttpClient {
    http: HttpClient,
}

impl PdbHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Ok(Self {
            http: HttpClient::new(Upstream::Pdb)?,
        })
    }
}

impl PdbClient for PdbHttpClient {
    fn best_structures(&self, accession: &str, deadline: Duration) -> Result<Value, KiraError> {
        let url = format!("{SIFTS_URL}/{accession}");
        match self.http.get_json(&url, &[], deadline) {
            Err(err) if err.is_upstream_not_found() => Ok(Value::Null),
            other => other,
        }
    }

    fn search_by_accession(&self, accession: &str, deadline: Duration) -> Result<Value, KiraError> {
        let body = search_body(accession);
        Ok(self
            .http
            .post_json(SEARCH_URL, &body, deadline)?
            .unwrap_or(Value::Null))
    }

    fn entry(&self, pdb_id: &str, deadline: Duration) -> Result<Value, KiraError> {
        let url = format!("{ENTRY_URL}/{pdb_id}");
        self.http.get_json(&url, &[], deadline)
    }
}

pub fn search_body(accession: &str) -> Value {
    json!({
        "query": {
            "type": "terminal",
            "service": "text",
            "parameters": {
                "attribute": "rcsb_polymer_entity_container_identifiers.reference_sequence_identifiers.database_accession",
                "operator": "exact_match",
                "value": accession
            }
        },
        "return_type": "entry",
        "request_options": { "paginate": { "start": 0, "rows": 25 } }
    })
}

/// Structures from the SIFTS mapping, best first, one per PDB id.
pub fn parse_best_structures(raw: &Value, accession: &str) -> Vec<ExperimentalStructure> {
    let mut structures: Vec<ExperimentalStructure> = Vec::new();
    let items = raw
        .get(accession)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    for item in items {
        let Some(id) = item.get("pdb_id").and_then(|v| v.as_str()) else {
            continue;
        };
        let id = id.to_uppercase();
        if structures.iter().any(|s| s.id == id) {
            continue;
        }
        structures.push(ExperimentalStructure {
            id,
            method: item
                .get("experimental_method")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string()),
            resolution: item.get("resolution").and_then(|v| v.as_f64()),
            title: None,
        });
    }
    structures
}

pub fn parse_search_ids(raw: &Value) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    if let Some(results) = raw.get("result_set").and_then(|v| v.as_array()) {
        for result in results {
            if let Some(id) = result.get("identifier").and_then(|v| v.as_str()) {
                let id = id.to_uppercase();
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }
    ids
}

/// Fills method, resolution and title from an RCSB entry, keeping values
/// already known when the entry lacks them.
pub fn enrich_from_entry(structure: &mut ExperimentalStructure, raw: &Value) {
    let title = raw
        .get("struct")
        .and_then(|value| value.get("title"))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string());
    let method = raw
        .get("exptl")
        .and_then(|value| value.as_array())
        .and_then(|array| array.first())
        .and_then(|value| value.get("method"))
        .and_then(|value| value.as_str())
        .map(|value| value.to_string());
    let resolution = raw
        .get("rcsb_entry_info")
        .and_then(|value| value.get("resolution_combined"))
        .and_then(|value| value.as_array())
        .and_then(|array| array.first())
        .and_then(|value| value.as_f64());

    if title.is_some() {
        structure.title = title;
    }
    if method.is_some() {
        structure.method = method;
    }
    if resolution.is_some() {
        structure.resolution = resolution;
    }
}

pub struct PdbAdapter {
    client: Arc<dyn PdbClient>,
    ctx: AdapterContext,
}

impl PdbAdapter {
    pub fn new(client: Arc<dyn PdbClient>, ctx: AdapterContext) -> Self {
        Self { client, ctx }
    }

    fn candidates(&self, accession: &str) -> Result<Vec<ExperimentalStructure>, KiraError> {
        let client = Arc::clone(&self.client);
        let acc = accession.to_string();
        let mapping = self.ctx.call(
            Upstream::Pdb,
            "best_structures",
            cache_key(Upstream::Pdb, "best_structures", &[accession]),
            CacheCategory::ExperimentalStructures,
            move |deadline| client.best_structures(&acc, deadline),
        );
        match mapping {
            Ok(raw) => {
                let structures = parse_best_structures(&raw, accession);
                if !structures.is_empty() {
                    return Ok(structures);
                }
            }
            Err(err) => {
                tracing::warn!(accession, error = %err, "SIFTS mapping failed, trying RCSB search");
            }
        }

        let client = Arc::clone(&self.client);
        let acc = accession.to_string();
        let raw = self.ctx.call(
            Upstream::Pdb,
            "search",
            cache_key(Upstream::Pdb, "search", &[accession]),
            CacheCategory::ExperimentalStructures,
            move |deadline| client.search_by_accession(&acc, deadline),
        )?;
        Ok(parse_search_ids(&raw)
            .into_iter()
            .map(|id| ExperimentalStructure {
                id,
                method: None,
                resolution: None,
                title: None,
            })
            .collect())
    }
}

impl SourceAdapter for PdbAdapter {
    fn upstream(&self) -> Upstream {
        Upstream::Pdb
    }

    fn fetch(&self, query: &FragmentQuery) -> Result<GeneFragment, KiraError> {
        let Some(accession) = query.uniprot_id.as_deref() else {
            return Ok(GeneFragment::default());
        };
        let mut structures = self.candidates(accession)?;
        structures.truncate(MAX_ENRICHED);

        for structure in structures.iter_mut() {
            let client = Arc::clone(&self.client);
            let id = structure.id.clone();
            let entry = self.ctx.call(
                Upstream::Pdb,
                "entry",
                cache_key(Upstream::Pdb, "entry", &[&structure.id]),
                CacheCategory::ExperimentalStructures,
                move |deadline| client.entry(&id, deadline),
            );
            match entry {
                Ok(raw) => enrich_from_entry(structure, &raw),
                Err(err) => {
                    tracing::debug!(pdb_id = %structure.id, error = %err, "structure enrichment failed");
                }
            }
        }

        let mut fragment = GeneFragment::default();
        if let Some(first) = structures.first() {
            fragment.links.insert(
                "pdb".to_string(),
                format!("https://www.rcsb.org/structure/{}", first.id),
            );
        }
        fragment.structures = structures;
        Ok(fragment)
    }
}
