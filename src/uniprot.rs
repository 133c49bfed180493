use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::adapter::{AdapterContext, FragmentQuery, SourceAdapter, cache_key};
use crate::cache::CacheCategory;
use crate::domain::{Organism, Upstream};
use crate::error::KiraError;
use crate::fragment::{GeneFragment, GoCategory, GoTerm};
use crate::http::HttpClient;

const SEARCH_URL: &str = "https://rest.uniprot.org/uniprotkb/search";

/// Keywords carried by most entries that say nothing about the gene.
pub const KEYWORD_DENYLIST: &[&str] = &[
    "Reference proteome",
    "3D-structure",
    "Direct protein sequencing",
    "Proteomics identification",
    "Acetylation",
    "Phosphoprotein",
];

pub trait UniprotClient: Send + Sync {
    /// Runs a UniProtKB search and returns the raw JSON result page.
    fn search(&self, query: &str, deadline: Duration) -> Result<Value, KiraError>;
}

#[derive(Clone)]
pub struct UniprotHttpClient {
    http: HttpClient,
}

impl UniprotHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Ok(Self {
            http: HttpClient::new(Upstream::Uniprot)?,
        })
    }
}

impl UniprotClient for UniprotHttpClient {
    fn search(&self, query: &str, deadline: Duration) -> Result<Value, KiraError> {
        let params = [
            ("query", query.to_string()),
            ("format", "json".to_string()),
            ("size", "1".to_string()),
        ];
        self.http.get_json(SEARCH_URL, &params, deadline)
    }
}

/// Query strategies in priority order: curated reference proteome, reviewed
/// entries for the exact taxon, the broader taxon, then anything.
pub fn query_strategies(symbol: &str, organism: &Organism) -> Vec<String> {
    let mut queries = Vec::new();
    if let Some(proteome) = organism.reference_proteome {
        queries.push(format!("gene_exact:{symbol} AND proteome:{proteome}"));
    }
    queries.push(format!(
        "gene_exact:{symbol} AND organism_id:{} AND reviewed:true",
        organism.taxonomy
    ));
    if let Some(broader) = organism.broader_taxonomy {
        queries.push(format!("gene_exact:{symbol} AND organism_id:{broader}"));
    }
    queries.push(format!("gene:{symbol} AND organism_id:{}", organism.taxonomy));
    queries
}

pub fn first_result(raw: &Value) -> Option<&Value> {
    raw.get("results")
        .and_then(|v| v.as_array())
        .and_then(|results| results.first())
}

pub fn extract_fragment(entry: &Value, requested_symbol: &str) -> Option<GeneFragment> {
    let accession = entry
        .get("primaryAccession")
        .and_then(|v| v.as_str())?
        .to_string();

    let protein_name = entry
        .get("proteinDescription")
        .and_then(|v| v.get("recommendedName"))
        .and_then(|v| v.get("fullName"))
        .and_then(|v| v.get("value"))
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .or_else(|| {
            entry
                .get("proteinDescription")
                .and_then(|v| v.get("submissionNames"))
                .and_then(|v| v.as_array())
                .and_then(|arr| arr.first())
                .and_then(|v| v.get("fullName"))
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
        });

    let mut gene_names = Vec::new();
    let mut synonyms = Vec::new();
    if let Some(genes) = entry.get("genes").and_then(|v| v.as_array()) {
        for gene in genes {
            if let Some(name) = gene
                .get("geneName")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
            {
                gene_names.push(name.to_string());
            }
            for field in ["synonyms", "orderedLocusNames", "orfNames"] {
                if let Some(names) = gene.get(field).and_then(|v| v.as_array()) {
                    for name in names {
                        if let Some(value) = name.get("value").and_then(|v| v.as_str()) {
                            if !synonyms.iter().any(|s| s == value) {
                                synonyms.push(value.to_string());
                            }
                        }
                    }
                }
            }
        }
    }
    let symbol = gene_names
        .iter()
        .find(|name| name.eq_ignore_ascii_case(requested_symbol))
        .or_else(|| gene_names.first())
        .cloned();

    let mut functions = Vec::new();
    let mut locations = Vec::new();
    if let Some(comments) = entry.get("comments").and_then(|v| v.as_array()) {
        for comment in comments {
            match comment.get("commentType").and_then(|v| v.as_str()) {
                Some("FUNCTION") => {
                    if let Some(texts) = comment.get("texts").and_then(|v| v.as_array()) {
                        for text in texts {
                            if let Some(value) = text.get("value").and_then(|v| v.as_str()) {
                                functions.push(value.to_string());
                            }
                        }
                    }
                }
                Some("SUBCELLULAR LOCATION") => {
                    if let Some(items) = comment
                        .get("subcellularLocations")
                        .and_then(|v| v.as_array())
                    {
                        for item in items {
                            if let Some(value) = item
                                .get("location")
                                .and_then(|v| v.get("value"))
                                .and_then(|v| v.as_str())
                            {
                                if !locations.iter().any(|l| l == value) {
                                    locations.push(value.to_string());
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut go_terms = Vec::new();
    if let Some(xrefs) = entry
        .get("uniProtKBCrossReferences")
        .and_then(|v| v.as_array())
    {
        for xref in xrefs {
            if xref.get("database").and_then(|v| v.as_str()) != Some("GO") {
                continue;
            }
            let Some(id) = xref.get("id").and_then(|v| v.as_str()) else {
                continue;
            };
            let term = xref
                .get("properties")
                .and_then(|v| v.as_array())
                .and_then(|props| {
                    props.iter().find(|prop| {
                        prop.get("key").and_then(|v| v.as_str()) == Some("GoTerm")
                    })
                })
                .and_then(|prop| prop.get("value"))
                .and_then(|v| v.as_str());
            if let Some(go_term) = term.and_then(|value| parse_go_term(id, value)) {
                go_terms.push(go_term);
            }
        }
    }

    let keywords = entry
        .get("keywords")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(|v| v.as_str()))
                .filter(|name| !KEYWORD_DENYLIST.contains(name))
                .map(|name| name.to_string())
                .collect()
        })
        .unwrap_or_default();

    let sequence = entry.get("sequence");
    let mass_kda = sequence
        .and_then(|v| v.get("molWeight"))
        .and_then(|v| v.as_f64())
        .map(daltons_to_kda);

    let mut fragment = GeneFragment {
        symbol,
        synonyms,
        uniprot_id: Some(accession.clone()),
        protein_name,
        function: (!functions.is_empty()).then(|| functions.join(" ")),
        subcellular_locations: locations,
        go_terms,
        keywords,
        sequence: sequence
            .and_then(|v| v.get("value"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string()),
        sequence_length: sequence.and_then(|v| v.get("length")).and_then(|v| v.as_u64()),
        mass_kda,
        ..GeneFragment::default()
    };
    fragment.links.insert(
        "uniprot".to_string(),
        format!("https://www.uniprot.org/uniprotkb/{accession}/entry"),
    );
    Some(fragment)
}

/// Splits `P:DNA replication initiation` into category and term.
pub fn parse_go_term(id: &str, value: &str) -> Option<GoTerm> {
    let (prefix, term) = value.split_once(':')?;
    let category = match prefix {
        "P" => GoCategory::BiologicalProcess,
        "F" => GoCategory::MolecularFunction,
        "C" => GoCategory::CellularComponent,
        _ => return None,
    };
    Some(GoTerm {
        id: id.to_string(),
        term: term.trim().to_string(),
        category,
    })
}

pub fn daltons_to_kda(daltons: f64) -> f64 {
    (daltons / 10.0).round() / 100.0
}

pub struct UniprotAdapter {
    client: Arc<dyn UniprotClient>,
    ctx: AdapterContext,
}

impl UniprotAdapter {
    pub fn new(client: Arc<dyn UniprotClient>, ctx: AdapterContext) -> Self {
        Self { client, ctx }
    }
}

impl SourceAdapter for UniprotAdapter {
    fn upstream(&self) -> Upstream {
        Upstream::Uniprot
    }

    fn fetch(&self, query: &FragmentQuery) -> Result<GeneFragment, KiraError> {
        let symbol = query.symbol.as_str();
        let mut last_error = None;
        for strategy in query_strategies(symbol, query.organism) {
            let client = Arc::clone(&self.client);
            let search = strategy.clone();
            let result = self.ctx.call(
                Upstream::Uniprot,
                "search",
                cache_key(Upstream::Uniprot, "search", &[&strategy]),
                CacheCategory::ProteinRecord,
                move |deadline| client.search(&search, deadline),
            );
            match result {
                Ok(raw) => {
                    if let Some(fragment) = first_result(&raw).and_then(|e| extract_fragment(e, symbol)) {
                        tracing::debug!(query = %strategy, accession = ?fragment.uniprot_id, "UniProt hit");
                        return Ok(fragment);
                    }
                }
                Err(err) => {
                    tracing::warn!(query = %strategy, error = %err, "UniProt search failed");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(GeneFragment::default()),
        }
    }
}
