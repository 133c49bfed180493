use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::adapter::{AdapterContext, FragmentQuery, SourceAdapter, cache_key};
use crate::cache::CacheCategory;
use crate::domain::Upstream;
use crate::error::KiraError;
use crate::fragment::GeneFragment;
use crate::http::HttpClient;

pub trait AlphaFoldClient: Send + Sync {
    /// Prediction metadata for an accession, `None` when no model exists.
    fn prediction(&self, accession: &str, deadline: Duration) -> Result<Option<Value>, KiraError>;
}

#[derive(Clone)]
pub struct AlphaFoldHttpClient {
    http: HttpClient,
}

impl AlphaFoldHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Ok(Self {
            http: HttpClient::new(Upstream::AlphaFold)?,
        })
    }
}

impl AlphaFoldClient for AlphaFoldHttpClient {
    fn prediction(&self, accession: &str, deadline: Duration) -> Result<Option<Value>, KiraError> {
        let url = format!("https://alphafold.ebi.ac.uk/api/prediction/{accession}");
        match self.http.get_json(&url, &[], deadline) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_upstream_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

pub fn entry_url(accession: &str) -> String {
    format!("https://alphafold.ebi.ac.uk/entry/{accession}")
}

/// True when the prediction payload lists at least one model.
pub fn has_prediction(raw: &Value) -> bool {
    match raw {
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => map.contains_key("entryId"),
        _ => false,
    }
}

pub struct AlphaFoldAdapter {
    client: Arc<dyn AlphaFoldClient>,
    ctx: AdapterContext,
}

impl AlphaFoldAdapter {
    pub fn new(client: Arc<dyn AlphaFoldClient>, ctx: AdapterContext) -> Self {
        Self { client, ctx }
    }
}

impl SourceAdapter for AlphaFoldAdapter {
    fn upstream(&self) -> Upstream {
        Upstream::AlphaFold
    }

    fn fetch(&self, query: &FragmentQuery) -> Result<GeneFragment, KiraError> {
        let Some(accession) = query.uniprot_id.clone() else {
            return Ok(GeneFragment::default());
        };
        let client = Arc::clone(&self.client);
        let id = accession.clone();
        let raw: Option<Value> = self.ctx.call(
            Upstream::AlphaFold,
            "prediction",
            cache_key(Upstream::AlphaFold, "prediction", &[&accession]),
            CacheCategory::StructurePrediction,
            move |deadline| client.prediction(&id, deadline),
        )?;

        let available = raw.as_ref().is_some_and(has_prediction);
        let mut fragment = GeneFragment {
            alphafold_available: Some(available),
            ..GeneFragment::default()
        };
        if available {
            let url = entry_url(&accession);
            fragment.alphafold_url = Some(url.clone());
            fragment.links.insert("alphafold".to_string(), url);
        }
        Ok(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prediction_detection() {
        assert!(has_prediction(&json!([{ "entryId": "AF-P03004-F1" }])));
        assert!(!has_prediction(&json!([])));
        assert!(!has_prediction(&Value::Null));
    }
}
