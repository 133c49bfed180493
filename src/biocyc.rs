//! Pathway and regulation data from BioCyc.
//!
//! Every request carries the session cookie from [`SessionManager`]. Pathway
//! Tools answers in its own XML dialect; only the ID / common-name pairs of
//! a few element types are consumed, through [`RegulationParser`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterContext, FragmentQuery, cache_key};
use crate::cache::CacheCategory;
use crate::domain::Upstream;
use crate::error::KiraError;
use crate::http::HttpClient;
use crate::runtime::Clock;
use crate::session::SessionManager;

const BIOCYC_BASE: &str = "https://websvc.biocyc.org";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    Pathways,
    Regulators,
    RegulatedGenes,
    TranscriptionUnits,
}

impl FollowUp {
    pub const ALL: [FollowUp; 4] = [
        FollowUp::Pathways,
        FollowUp::Regulators,
        FollowUp::RegulatedGenes,
        FollowUp::TranscriptionUnits,
    ];

    /// Pathway Tools API function name.
    pub fn function(self) -> &'static str {
        match self {
            FollowUp::Pathways => "pathways-of-gene",
            FollowUp::Regulators => "genes-regulating-gene",
            FollowUp::RegulatedGenes => "genes-regulated-by-gene",
            FollowUp::TranscriptionUnits => "transcription-units-of-gene",
        }
    }

    pub fn element(self) -> Element {
        match self {
            FollowUp::Pathways => Element::Pathway,
            FollowUp::Regulators | FollowUp::RegulatedGenes => Element::Gene,
            FollowUp::TranscriptionUnits => Element::TranscriptionUnit,
        }
    }
}

/// XML element types the parser extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Gene,
    Pathway,
    TranscriptionUnit,
}

impl Element {
    fn tag(self) -> &'static str {
        match self {
            Element::Gene => "Gene",
            Element::Pathway => "Pathway",
            Element::TranscriptionUnit => "Transcription-Unit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BioCycQuery {
    FindGene { org: String, symbol: String },
    Follow { follow_up: FollowUp, gene_id: String },
}

impl BioCycQuery {
    pub fn endpoint(&self) -> &'static str {
        match self {
            BioCycQuery::FindGene { .. } => "xmlquery",
            BioCycQuery::Follow { follow_up, .. } => follow_up.function(),
        }
    }

    pub fn cache_key(&self) -> String {
        match self {
            BioCycQuery::FindGene { org, symbol } => {
                cache_key(Upstream::BioCyc, self.endpoint(), &[org, symbol])
            }
            BioCycQuery::Follow { gene_id, .. } => {
                cache_key(Upstream::BioCyc, self.endpoint(), &[gene_id])
            }
        }
    }

    pub fn url_and_params(&self) -> (String, Vec<(&'static str, String)>) {
        match self {
            BioCycQuery::FindGene { org, symbol } => (
                format!("{BIOCYC_BASE}/xmlquery"),
                vec![
                    ("query", format!("[x:x<-{org}^^genes,x^name=\"{symbol}\"]")),
                    ("detail", "low".to_string()),
                ],
            ),
            BioCycQuery::Follow { follow_up, gene_id } => (
                format!("{BIOCYC_BASE}/apixml"),
                vec![
                    ("fn", follow_up.function().to_string()),
                    ("id", gene_id.clone()),
                    ("detail", "low".to_string()),
                ],
            ),
        }
    }
}

pub trait BioCycClient: Send + Sync {
    /// An empty `cookie` sends the request without session material.
    fn get_xml(&self, query: &BioCycQuery, cookie: &str, deadline: Duration) -> Result<String, KiraError>;
}

#[derive(Clone)]
pub struct BioCycHttpClient {
    http: HttpClient,
}

impl BioCycHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        Ok(Self {
            http: HttpClient::new(Upstream::BioCyc)?,
        })
    }
}

impl BioCycClient for BioCycHttpClient {
    fn get_xml(&self, query: &BioCycQuery, cookie: &str, deadline: Duration) -> Result<String, KiraError> {
        let (url, params) = query.url_and_params();
        let cookie = Some(cookie).filter(|value| !value.is_empty());
        self.http.get_text(&url, &params, cookie, deadline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulationLink {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulationSummary {
    pub gene_id: String,
    pub pathways: Vec<RegulationLink>,
    pub regulators: Vec<RegulationLink>,
    pub regulated_genes: Vec<RegulationLink>,
    pub transcription_units: Vec<RegulationLink>,
    pub source: Upstream,
    pub fetched_at: DateTime<Utc>,
}

/// Extraction of the few fields consumed from a regulation response.
/// Malformed or unexpected input yields nothing rather than an error.
pub trait RegulationParser: Send + Sync {
    /// Frame id of the first gene in a name search answer.
    fn gene_id(&self, xml: &str) -> Option<String>;
    fn links(&self, xml: &str, element: Element) -> Vec<RegulationLink>;
}

pub struct PtoolsXmlParser {
    gene: Regex,
    pathway: Regex,
    transcription_unit: Regex,
    common_name: Regex,
    markup: Regex,
}

impl PtoolsXmlParser {
    pub fn new() -> Result<Self, KiraError> {
        Ok(Self {
            gene: element_regex(Element::Gene)?,
            pathway: element_regex(Element::Pathway)?,
            transcription_unit: element_regex(Element::TranscriptionUnit)?,
            common_name: compile(r"(?s)<common-name[^>]*>(.*?)</common-name>")?,
            markup: compile(r"<[^>]+>")?,
        })
    }

    fn regex_for(&self, element: Element) -> &Regex {
        match element {
            Element::Gene => &self.gene,
            Element::Pathway => &self.pathway,
            Element::TranscriptionUnit => &self.transcription_unit,
        }
    }

    fn clean_name(&self, raw: &str) -> Option<String> {
        let decoded = decode_entities(raw);
        let stripped = self.markup.replace_all(&decoded, "");
        let name = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        (!name.is_empty()).then_some(name)
    }
}

impl RegulationParser for PtoolsXmlParser {
    fn gene_id(&self, xml: &str) -> Option<String> {
        self.gene
            .captures(xml)
            .and_then(|caps| caps.get(1))
            .map(|id| id.as_str().to_string())
    }

    fn links(&self, xml: &str, element: Element) -> Vec<RegulationLink> {
        let mut links: Vec<RegulationLink> = Vec::new();
        for caps in self.regex_for(element).captures_iter(xml) {
            let Some(id) = caps.get(1).map(|m| m.as_str()) else {
                continue;
            };
            if links.iter().any(|link| link.id == id) {
                continue;
            }
            let name = caps
                .get(2)
                .and_then(|body| self.common_name.captures(body.as_str()))
                .and_then(|name| name.get(1))
                .and_then(|name| self.clean_name(name.as_str()));
            links.push(RegulationLink {
                id: id.to_string(),
                name,
            });
        }
        links
    }
}

fn element_regex(element: Element) -> Result<Regex, KiraError> {
    let tag = regex::escape(element.tag());
    compile(&format!(r#"(?s)<{tag}\s[^>]*\bID="([^"]+)"[^>]*>(.*?)</{tag}>"#))
}

fn compile(pattern: &str) -> Result<Regex, KiraError> {
    Regex::new(pattern).map_err(|err| KiraError::Internal(format!("invalid pattern: {err}")))
}

pub fn decode_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn is_auth_rejection(err: &KiraError) -> bool {
    matches!(
        err,
        KiraError::UpstreamStatus {
            status: 401 | 403,
            ..
        }
    )
}

pub struct BioCycAdapter {
    client: Arc<dyn BioCycClient>,
    sessions: Arc<SessionManager>,
    parser: Arc<dyn RegulationParser>,
    ctx: AdapterContext,
    clock: Arc<dyn Clock>,
}

impl BioCycAdapter {
    pub fn new(
        client: Arc<dyn BioCycClient>,
        sessions: Arc<SessionManager>,
        parser: Arc<dyn RegulationParser>,
        ctx: AdapterContext,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            sessions,
            parser,
            ctx,
            clock,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn regulation(&self, query: &FragmentQuery) -> Result<RegulationSummary, KiraError> {
        let symbol = query.symbol.as_str();
        let org = query.organism.biocyc_org.ok_or_else(|| {
            KiraError::InvalidRequest(format!(
                "no BioCyc database for organism {}",
                query.organism.name
            ))
        })?;

        let search = self.fetch_xml(BioCycQuery::FindGene {
            org: org.to_string(),
            symbol: symbol.to_string(),
        })?;
        let gene_id = self
            .parser
            .gene_id(&search)
            .ok_or_else(|| KiraError::GeneNotFound {
                symbol: symbol.to_string(),
                organism: query.organism.name.to_string(),
            })?;
        tracing::debug!(symbol, gene_id = %gene_id, "BioCyc gene resolved");

        let [pathways, regulators, regulated_genes, transcription_units] =
            thread::scope(|scope| {
                let handles = FollowUp::ALL.map(|follow_up| {
                    let gene_id = gene_id.clone();
                    scope.spawn(move || self.follow(follow_up, gene_id))
                });
                handles.map(|handle| handle.join().unwrap_or_default())
            });

        Ok(RegulationSummary {
            gene_id,
            pathways,
            regulators,
            regulated_genes,
            transcription_units,
            source: Upstream::BioCyc,
            fetched_at: self.clock.now(),
        })
    }

    fn follow(&self, follow_up: FollowUp, gene_id: String) -> Vec<RegulationLink> {
        match self.fetch_xml(BioCycQuery::Follow {
            follow_up,
            gene_id: gene_id.clone(),
        }) {
            Ok(xml) => self.parser.links(&xml, follow_up.element()),
            Err(err) => {
                tracing::warn!(
                    gene_id = %gene_id,
                    endpoint = follow_up.function(),
                    error = %err,
                    "BioCyc follow-up failed"
                );
                Vec::new()
            }
        }
    }

    /// One authenticated request. A rejected cookie is dropped and the
    /// request retried once with a fresh login.
    fn fetch_xml(&self, query: BioCycQuery) -> Result<String, KiraError> {
        match self.cached_xml(&query) {
            Err(err) if is_auth_rejection(&err) => {
                tracing::info!(endpoint = query.endpoint(), "BioCyc session rejected, logging in again");
                self.sessions.invalidate();
                self.cached_xml(&query)
            }
            other => other,
        }
    }

    fn cached_xml(&self, query: &BioCycQuery) -> Result<String, KiraError> {
        let client = Arc::clone(&self.client);
        let sessions = Arc::clone(&self.sessions);
        let request = query.clone();
        let requires_auth = self.ctx.limiter().config(Upstream::BioCyc).requires_auth;
        self.ctx.call(
            Upstream::BioCyc,
            query.endpoint(),
            query.cache_key(),
            CacheCategory::Regulation,
            move |deadline| {
                let cookie = if requires_auth {
                    sessions.get_session()?.cookie
                } else {
                    String::new()
                };
                client.get_xml(&request, &cookie, deadline)
            },
        )
    }
}
