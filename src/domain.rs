use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Upstream {
    Ncbi,
    Uniprot,
    AlphaFold,
    Pdb,
    String,
    BioCyc,
}

impl Upstream {
    pub const ALL: [Upstream; 6] = [
        Upstream::Ncbi,
        Upstream::Uniprot,
        Upstream::AlphaFold,
        Upstream::Pdb,
        Upstream::String,
        Upstream::BioCyc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Upstream::Ncbi => "ncbi",
            Upstream::Uniprot => "uniprot",
            Upstream::AlphaFold => "alphafold",
            Upstream::Pdb => "pdb",
            Upstream::String => "string",
            Upstream::BioCyc => "biocyc",
        }
    }

    /// Upstreams that honour the elevated-rate credential.
    pub fn supports_elevated_rate(self) -> bool {
        matches!(self, Upstream::Ncbi | Upstream::BioCyc)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Upstream {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Upstream::ALL
            .into_iter()
            .find(|api| api.as_str() == normalized)
            .ok_or_else(|| KiraError::InvalidRequest(format!("unknown upstream: {value}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeneSymbol(String);

impl GeneSymbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeneSymbol {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized.len() <= 64
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || "-_.()'".contains(ch));
        if !is_valid {
            return Err(KiraError::InvalidGeneSymbol(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Static organism entry used to route queries to every registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Organism {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub taxonomy: &'static str,
    /// Species-level key used when a strain-level query fails.
    pub broader_taxonomy: Option<&'static str>,
    pub reference_proteome: Option<&'static str>,
    pub biocyc_org: Option<&'static str>,
}

pub const ORGANISMS: &[Organism] = &[
    Organism {
        name: "Escherichia coli",
        aliases: &["e. coli", "e.coli", "ecoli", "escherichia coli k-12", "escherichia coli k12"],
        taxonomy: "511145",
        broader_taxonomy: Some("562"),
        reference_proteome: Some("UP000000625"),
        biocyc_org: Some("ECOLI"),
    },
    Organism {
        name: "Homo sapiens",
        aliases: &["human", "h. sapiens"],
        taxonomy: "9606",
        broader_taxonomy: None,
        reference_proteome: Some("UP000005640"),
        biocyc_org: Some("HUMAN"),
    },
    Organism {
        name: "Mus musculus",
        aliases: &["mouse", "m. musculus"],
        taxonomy: "10090",
        broader_taxonomy: None,
        reference_proteome: Some("UP000000589"),
        biocyc_org: Some("MOUSE"),
    },
    Organism {
        name: "Saccharomyces cerevisiae",
        aliases: &["yeast", "s. cerevisiae", "saccharomyces cerevisiae s288c"],
        taxonomy: "559292",
        broader_taxonomy: Some("4932"),
        reference_proteome: Some("UP000002311"),
        biocyc_org: Some("YEAST"),
    },
    Organism {
        name: "Bacillus subtilis",
        aliases: &["b. subtilis", "bacillus subtilis 168"],
        taxonomy: "224308",
        broader_taxonomy: Some("1423"),
        reference_proteome: Some("UP000001570"),
        biocyc_org: Some("BSUB"),
    },
    Organism {
        name: "Mycobacterium tuberculosis",
        aliases: &["m. tuberculosis", "mycobacterium tuberculosis h37rv", "mtb"],
        taxonomy: "83332",
        broader_taxonomy: Some("1773"),
        reference_proteome: Some("UP000001584"),
        biocyc_org: Some("MTBRV"),
    },
    Organism {
        name: "Arabidopsis thaliana",
        aliases: &["arabidopsis", "a. thaliana"],
        taxonomy: "3702",
        broader_taxonomy: None,
        reference_proteome: Some("UP000006548"),
        biocyc_org: Some("ARA"),
    },
    Organism {
        name: "Drosophila melanogaster",
        aliases: &["fruit fly", "drosophila", "d. melanogaster"],
        taxonomy: "7227",
        broader_taxonomy: None,
        reference_proteome: Some("UP000000803"),
        biocyc_org: None,
    },
    Organism {
        name: "Caenorhabditis elegans",
        aliases: &["c. elegans", "worm"],
        taxonomy: "6239",
        broader_taxonomy: None,
        reference_proteome: Some("UP000001940"),
        biocyc_org: None,
    },
    Organism {
        name: "Danio rerio",
        aliases: &["zebrafish", "d. rerio"],
        taxonomy: "7955",
        broader_taxonomy: None,
        reference_proteome: Some("UP000000437"),
        biocyc_org: None,
    },
];

impl Organism {
    pub fn reference() -> &'static Organism {
        &ORGANISMS[0]
    }

    /// Resolves a free-form organism name, falling back to the reference
    /// organism when the name is unknown.
    pub fn resolve(name: &str) -> &'static Organism {
        Self::lookup(name).unwrap_or_else(|| {
            tracing::debug!(organism = name, "unknown organism, using reference organism");
            Self::reference()
        })
    }

    pub fn lookup(name: &str) -> Option<&'static Organism> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return None;
        }
        ORGANISMS.iter().find(|organism| {
            normalize_name(organism.name) == normalized
                || organism.taxonomy == normalized
                || organism.aliases.iter().any(|alias| *alias == normalized)
        })
    }
}

fn normalize_name(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneRequest {
    pub symbol: String,
    pub organism: String,
}

impl GeneRequest {
    pub fn new(symbol: impl Into<String>, organism: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            organism: organism.into(),
        }
    }
}
