use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Upstream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoCategory {
    BiologicalProcess,
    MolecularFunction,
    CellularComponent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoTerm {
    pub id: String,
    pub term: String,
    pub category: GoCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentalStructure {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub gene: String,
    pub score: f64,
}

/// Partial gene record produced by one upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncbi_gene_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chromosome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strand: Option<Strand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uniprot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subcellular_locations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub go_terms: Vec<GoTerm>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mass_kda: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alphafold_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alphafold_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structures: Vec<ExperimentalStructure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<Interaction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,
}

impl GeneFragment {
    pub fn is_empty(&self) -> bool {
        self == &GeneFragment::default()
    }

    /// Field-level merge: every non-empty field of `later` replaces the
    /// current value, links are unioned with `later` winning on conflicts.
    pub fn merge(&mut self, later: GeneFragment) {
        let GeneFragment {
            symbol,
            name,
            synonyms,
            description,
            ncbi_gene_id,
            chromosome,
            start,
            stop,
            strand,
            uniprot_id,
            protein_name,
            function,
            subcellular_locations,
            go_terms,
            keywords,
            sequence,
            sequence_length,
            mass_kda,
            alphafold_available,
            alphafold_url,
            structures,
            interactions,
            links,
        } = later;

        merge_text(&mut self.symbol, symbol);
        merge_text(&mut self.name, name);
        merge_list(&mut self.synonyms, synonyms);
        merge_text(&mut self.description, description);
        merge_text(&mut self.ncbi_gene_id, ncbi_gene_id);
        merge_text(&mut self.chromosome, chromosome);
        merge_value(&mut self.start, start);
        merge_value(&mut self.stop, stop);
        merge_value(&mut self.strand, strand);
        merge_text(&mut self.uniprot_id, uniprot_id);
        merge_text(&mut self.protein_name, protein_name);
        merge_text(&mut self.function, function);
        merge_list(&mut self.subcellular_locations, subcellular_locations);
        merge_list(&mut self.go_terms, go_terms);
        merge_list(&mut self.keywords, keywords);
        merge_text(&mut self.sequence, sequence);
        merge_value(&mut self.sequence_length, sequence_length);
        merge_value(&mut self.mass_kda, mass_kda);
        merge_value(&mut self.alphafold_available, alphafold_available);
        merge_text(&mut self.alphafold_url, alphafold_url);
        merge_list(&mut self.structures, structures);
        merge_list(&mut self.interactions, interactions);
        self.links.extend(links);
    }
}

fn merge_text(current: &mut Option<String>, later: Option<String>) {
    if let Some(value) = later.filter(|value| !value.trim().is_empty()) {
        *current = Some(value);
    }
}

fn merge_value<T>(current: &mut Option<T>, later: Option<T>) {
    if later.is_some() {
        *current = later;
    }
}

fn merge_list<T>(current: &mut Vec<T>, later: Vec<T>) {
    if !later.is_empty() {
        *current = later;
    }
}

/// Aggregated answer for one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSummary {
    pub symbol: String,
    pub organism: String,
    pub taxonomy_id: String,
    #[serde(flatten)]
    pub details: GeneFragment,
    pub sources: Vec<Upstream>,
    pub fetched_at: DateTime<Utc>,
}

impl GeneSummary {
    /// Merges fragments in the given order. Upstreams that produced an empty
    /// fragment are left out of `sources`.
    pub fn assemble(
        symbol: &str,
        organism: &str,
        taxonomy_id: &str,
        fragments: Vec<(Upstream, GeneFragment)>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let mut details = GeneFragment::default();
        let mut sources = Vec::new();
        for (api, fragment) in fragments {
            if fragment.is_empty() {
                continue;
            }
            sources.push(api);
            details.merge(fragment);
        }
        let symbol = details
            .symbol
            .take()
            .unwrap_or_else(|| symbol.to_string());
        Self {
            symbol,
            organism: organism.to_string(),
            taxonomy_id: taxonomy_id.to_string(),
            details,
            sources,
            fetched_at,
        }
    }
}
