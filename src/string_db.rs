use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::adapter::{AdapterContext, FragmentQuery, SourceAdapter, cache_key};
use crate::cache::CacheCategory;
use crate::domain::Upstream;
use crate::error::KiraError;
use crate::fragment::{GeneFragment, Interaction};
use crate::http::HttpClient;

pub const PARTNER_LIMIT: usize = 10;

const PARTNERS_URL: &str = "https://string-db.org/api/json/interaction_partners";

pub trait StringClient: Send + Sync {
    fn interaction_partners(
        &self,
        symbol: &str,
        species: &str,
        deadline: Duration,
    ) -> Result<Value, KiraError>;
}

#[derive(Clone)]
pub struct StringHttpClient {
    http: HttpClient,
}

impl StringHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Ok(Self {
            http: HttpClient::new(Upstream::String)?,
        })
    }
}

impl StringClient for StringHttpClient {
    fn interaction_partners(
        &self,
        symbol: &str,
        species: &str,
        deadline: Duration,
    ) -> Result<Value, KiraError> {
        let params = [
            ("identifiers", symbol.to_string()),
            ("species", species.to_string()),
            ("limit", PARTNER_LIMIT.to_string()),
            ("caller_identity", "kira-ga".to_string()),
        ];
        self.http.get_json(PARTNERS_URL, &params, deadline)
    }
}

/// Partners of `symbol`, strongest first, one entry per partner.
pub fn parse_partners(raw: &Value, symbol: &str) -> Vec<Interaction> {
    let mut partners: Vec<Interaction> = Vec::new();
    let Some(rows) = raw.as_array() else {
        return partners;
    };
    for row in rows {
        let name_a = row.get("preferredName_A").and_then(|v| v.as_str());
        let name_b = row.get("preferredName_B").and_then(|v| v.as_str());
        let partner = match (name_a, name_b) {
            (Some(a), Some(b)) if b.eq_ignore_ascii_case(symbol) => a,
            (_, Some(b)) => b,
            _ => continue,
        };
        let Some(score) = row.get("score").and_then(|v| v.as_f64()) else {
            continue;
        };
        match partners.iter_mut().find(|p| p.gene == partner) {
            Some(existing) => existing.score = existing.score.max(score),
            None => partners.push(Interaction {
                gene: partner.to_string(),
                score,
            }),
        }
    }
    partners.sort_by(|a, b| b.score.total_cmp(&a.score));
    partners.truncate(PARTNER_LIMIT);
    partners
}

pub struct StringAdapter {
    client: Arc<dyn StringClient>,
    ctx: AdapterContext,
}

impl StringAdapter {
    pub fn new(client: Arc<dyn StringClient>, ctx: AdapterContext) -> Self {
        Self { client, ctx }
    }

    fn partners(&self, symbol: &str, species: &str) -> Result<Value, KiraError> {
        let client = Arc::clone(&self.client);
        let (sym, sp) = (symbol.to_string(), species.to_string());
        self.ctx.call(
            Upstream::String,
            "interaction_partners",
            cache_key(Upstream::String, "interaction_partners", &[symbol, species]),
            CacheCategory::Interactions,
            move |deadline| client.interaction_partners(&sym, &sp, deadline),
        )
    }
}

impl SourceAdapter for StringAdapter {
    fn upstream(&self) -> Upstream {
        Upstream::String
    }

    fn fetch(&self, query: &FragmentQuery) -> Result<GeneFragment, KiraError> {
        let symbol = query.symbol.as_str();
        let mut species = query.organism.taxonomy;
        let raw = match self.partners(symbol, species) {
            Ok(raw) => raw,
            Err(err) => match query.organism.broader_taxonomy {
                Some(broader) => {
                    tracing::debug!(error = %err, broader, "STRING query failed, retrying broader taxonomy");
                    species = broader;
                    self.partners(symbol, broader)?
                }
                None => return Err(err),
            },
        };

        let interactions = parse_partners(&raw, symbol);
        let mut fragment = GeneFragment::default();
        if !interactions.is_empty() {
            fragment.links.insert(
                "string".to_string(),
                format!("https://string-db.org/network/{species}/{symbol}"),
            );
        }
        fragment.interactions = interactions;
        Ok(fragment)
    }
}
