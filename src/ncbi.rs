use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::adapter::{AdapterContext, FragmentQuery, SourceAdapter, cache_key};
use crate::cache::CacheCategory;
use crate::domain::{Organism, Upstream};
use crate::error::KiraError;
use crate::fragment::{GeneFragment, Strand};
use crate::http::HttpClient;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

pub trait NcbiClient: Send + Sync {
    /// `esearch` against the gene database, raw JSON.
    fn search_gene(&self, term: &str, deadline: Duration) -> Result<Value, KiraError>;
    /// `esummary` for one gene id, raw JSON.
    fn gene_summary(&self, gene_id: &str, deadline: Duration) -> Result<Value, KiraError>;
}

#[derive(Clone)]
pub struct NcbiHttpClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl NcbiHttpClient {
    pub fn new(api_key: Option<String>) -> Result<Self, KiraError> {
        Ok(Self {
            http: HttpClient::new(Upstream::Ncbi)?,
            base_url: EUTILS_BASE.to_string(),
            api_key,
        })
    }

    fn params(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "gene".to_string()), ("retmode", "json".to_string())];
        params.extend(extra.iter().cloned());
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }
}

impl NcbiClient for NcbiHttpClient {
    fn search_gene(&self, term: &str, deadline: Duration) -> Result<Value, KiraError> {
        let url = format!("{}/esearch.fcgi", self.base_url);
        let params = self.params(&[("term", term.to_string()), ("retmax", "5".to_string())]);
        self.http.get_json(&url, &params, deadline)
    }

    fn gene_summary(&self, gene_id: &str, deadline: Duration) -> Result<Value, KiraError> {
        let url = format!("{}/esummary.fcgi", self.base_url);
        let params = self.params(&[("id", gene_id.to_string())]);
        self.http.get_json(&url, &params, deadline)
    }
}

/// Search formulations, most specific first.
pub fn search_terms(symbol: &str, organism: &Organism) -> Vec<String> {
    let taxon = format!("txid{}[Organism:exp]", organism.taxonomy);
    let mut terms = vec![format!("{symbol}[Gene Name] AND {taxon}")];
    if let Some(broader) = organism.broader_taxonomy {
        terms.push(format!("{symbol}[Gene Name] AND txid{broader}[Organism:exp]"));
    }
    terms.push(format!("{symbol}[Sym] AND {taxon}"));
    terms.push(format!("{symbol}[Preferred Symbol] AND {taxon}"));
    terms
}

pub fn parse_search_ids(raw: &Value) -> Vec<String> {
    raw.get("esearchresult")
        .and_then(|v| v.get("idlist"))
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str())
                .map(|id| id.to_string())
                .collect()
        })
        .unwrap_or_default()
}

pub fn parse_gene_summary(raw: &Value, gene_id: &str) -> Option<GeneFragment> {
    let record = raw.get("result").and_then(|v| v.get(gene_id))?;
    if record.get("error").is_some() {
        return None;
    }
    let text = |field: &str| {
        record
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    };

    let synonyms = text("otheraliases")
        .map(|aliases| {
            aliases
                .split(',')
                .map(str::trim)
                .filter(|alias| !alias.is_empty())
                .map(|alias| alias.to_string())
                .collect()
        })
        .unwrap_or_default();

    let location = record
        .get("genomicinfo")
        .and_then(|v| v.as_array())
        .and_then(|items| items.first());
    let chr_start = location.and_then(|loc| loc.get("chrstart")).and_then(|v| v.as_u64());
    let chr_stop = location.and_then(|loc| loc.get("chrstop")).and_then(|v| v.as_u64());
    let (start, stop, strand) = match (chr_start, chr_stop) {
        (Some(a), Some(b)) if a > b => (Some(b + 1), Some(a + 1), Some(Strand::Minus)),
        (Some(a), Some(b)) => (Some(a + 1), Some(b + 1), Some(Strand::Plus)),
        _ => (None, None, None),
    };
    let chromosome = text("chromosome").or_else(|| {
        location
            .and_then(|loc| loc.get("chraccver"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
    });

    let mut fragment = GeneFragment {
        symbol: text("name"),
        name: text("description"),
        synonyms,
        description: text("summary"),
        ncbi_gene_id: Some(gene_id.to_string()),
        chromosome,
        start,
        stop,
        strand,
        ..GeneFragment::default()
    };
    fragment.links.insert(
        "ncbi".to_string(),
        format!("https://www.ncbi.nlm.nih.gov/gene/{gene_id}"),
    );
    Some(fragment)
}

pub struct NcbiAdapter {
    client: Arc<dyn NcbiClient>,
    ctx: AdapterContext,
}

impl NcbiAdapter {
    pub fn new(client: Arc<dyn NcbiClient>, ctx: AdapterContext) -> Self {
        Self { client, ctx }
    }

    fn find_gene_id(&self, query: &FragmentQuery) -> Result<Option<String>, KiraError> {
        let mut last_error = None;
        for term in search_terms(query.symbol.as_str(), query.organism) {
            let client = Arc::clone(&self.client);
            let search_term = term.clone();
            let result = self.ctx.call(
                Upstream::Ncbi,
                "esearch",
                cache_key(Upstream::Ncbi, "esearch", &[&term]),
                CacheCategory::GeneRecord,
                move |deadline| client.search_gene(&search_term, deadline),
            );
            match result {
                Ok(raw) => {
                    if let Some(id) = parse_search_ids(&raw).into_iter().next() {
                        tracing::debug!(term = %term, gene_id = %id, "NCBI gene search hit");
                        return Ok(Some(id));
                    }
                }
                Err(err) => {
                    tracing::warn!(term = %term, error = %err, "NCBI gene search failed");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

impl SourceAdapter for NcbiAdapter {
    fn upstream(&self) -> Upstream {
        Upstream::Ncbi
    }

    fn fetch(&self, query: &FragmentQuery) -> Result<GeneFragment, KiraError> {
        let Some(gene_id) = self.find_gene_id(query)? else {
            return Ok(GeneFragment::default());
        };
        let client = Arc::clone(&self.client);
        let id = gene_id.clone();
        let raw = self.ctx.call(
            Upstream::Ncbi,
            "esummary",
            cache_key(Upstream::Ncbi, "esummary", &[&gene_id]),
            CacheCategory::GeneRecord,
            move |deadline| client.gene_summary(&id, deadline),
        )?;
        Ok(parse_gene_summary(&raw, &gene_id).unwrap_or_default())
    }
}
