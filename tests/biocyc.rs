mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;

use common::Harness;
use kira_gene_aggregator::adapter::FragmentQuery;
use kira_gene_aggregator::biocyc::{
    BioCycAdapter, BioCycClient, BioCycQuery, Element, FollowUp, PtoolsXmlParser,
    RegulationParser,
};
use kira_gene_aggregator::config::BioCycCredentials;
use kira_gene_aggregator::domain::{Organism, Upstream};
use kira_gene_aggregator::error::KiraError;
use kira_gene_aggregator::ratelimit::RateLimitTable;
use kira_gene_aggregator::store::MemoryStore;
use kira_gene_aggregator::session::{LoginClient, SessionManager};

#[derive(Default)]
struct CountingLogin {
    logins: AtomicUsize,
}

impl LoginClient for CountingLogin {
    fn login(&self, _credentials: &BioCycCredentials) -> Result<String, KiraError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("PTools-session=s{n}"))
    }
}

/// Serves the dnaA fixtures, optionally rejecting one cookie or failing one
/// follow-up.
#[derive(Default)]
struct FixtureClient {
    rejected_cookie: Option<&'static str>,
    failing: Option<FollowUp>,
    requests: Mutex<Vec<(String, String)>>,
}

impl FixtureClient {
    fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

impl BioCycClient for FixtureClient {
    fn get_xml(&self, query: &BioCycQuery, cookie: &str, _deadline: Duration) -> Result<String, KiraError> {
        self.requests
            .lock()
            .unwrap()
            .push((query.endpoint().to_string(), cookie.to_string()));
        if self.rejected_cookie == Some(cookie) {
            return Err(KiraError::UpstreamStatus {
                api: Upstream::BioCyc,
                status: 401,
                message: "Unauthorized".to_string(),
            });
        }
        let fixture = match query {
            BioCycQuery::FindGene { symbol, .. } if symbol == "dnaA" => "biocyc_search_dnaA.xml",
            BioCycQuery::FindGene { .. } => "biocyc_empty.xml",
            BioCycQuery::Follow { follow_up, .. } if Some(*follow_up) == self.failing => {
                return Err(KiraError::UpstreamTimeout {
                    api: Upstream::BioCyc,
                    timeout_ms: 20_000,
                });
            }
            BioCycQuery::Follow { follow_up, .. } => match follow_up {
                FollowUp::Pathways => "biocyc_empty.xml",
                FollowUp::Regulators => "biocyc_regulators_dnaA.xml",
                FollowUp::RegulatedGenes => "biocyc_regulated_dnaA.xml",
                FollowUp::TranscriptionUnits => "biocyc_units_dnaA.xml",
            },
        };
        Ok(common::fixture(fixture))
    }
}

struct Setup {
    harness: Harness,
    login: Arc<CountingLogin>,
    client: Arc<FixtureClient>,
    adapter: BioCycAdapter,
}

fn setup(client: FixtureClient) -> Setup {
    setup_with(Harness::new(), client)
}

fn setup_with(harness: Harness, client: FixtureClient) -> Setup {
    let login = Arc::new(CountingLogin::default());
    let client = Arc::new(client);
    let sessions = Arc::new(SessionManager::new(
        login.clone(),
        Some(BioCycCredentials {
            username: "curator@example.org".to_string(),
            password: "hunter2".to_string(),
        }),
        harness.shared_store(),
        harness.clock.clone(),
    ));
    let adapter = BioCycAdapter::new(
        client.clone(),
        sessions,
        Arc::new(PtoolsXmlParser::new().unwrap()),
        harness.context.clone(),
        harness.clock.clone(),
    );
    Setup {
        harness,
        login,
        client,
        adapter,
    }
}

fn query(symbol: &str, organism: &str) -> FragmentQuery {
    FragmentQuery::new(symbol.parse().unwrap(), Organism::resolve(organism))
}

fn ids(links: &[kira_gene_aggregator::biocyc::RegulationLink]) -> Vec<&str> {
    links.iter().map(|link| link.id.as_str()).collect()
}

#[test]
fn parser_reads_fixture_links() {
    let parser = PtoolsXmlParser::new().unwrap();

    let search = common::fixture("biocyc_search_dnaA.xml");
    assert_eq!(parser.gene_id(&search).as_deref(), Some("ECOLI:EG10235"));
    assert_eq!(parser.gene_id(&common::fixture("biocyc_empty.xml")), None);

    let regulators = parser.links(&common::fixture("biocyc_regulators_dnaA.xml"), Element::Gene);
    assert_eq!(
        ids(&regulators),
        vec!["ECOLI:EG10235", "ECOLI:EG10317", "ECOLI:G7354"]
    );
    assert_eq!(regulators[1].name.as_deref(), Some("fis"));
    assert_eq!(regulators[2].name, None);

    let units = parser.links(
        &common::fixture("biocyc_units_dnaA.xml"),
        Element::TranscriptionUnit,
    );
    assert_eq!(units[0].name.as_deref(), Some("dnaAN-recF"));
    assert!(parser
        .links(&common::fixture("biocyc_units_dnaA.xml"), Element::Gene)
        .is_empty());
}

#[test]
fn full_regulation_lookup() {
    let setup = setup(FixtureClient::default());
    let summary = setup
        .adapter
        .regulation(&query("dnaA", "Escherichia coli"))
        .unwrap();

    assert_eq!(summary.gene_id, "ECOLI:EG10235");
    assert!(summary.pathways.is_empty());
    assert_eq!(summary.regulators.len(), 3);
    assert_eq!(
        ids(&summary.regulated_genes),
        vec!["ECOLI:EG10660", "ECOLI:EG10603"]
    );
    assert_eq!(
        ids(&summary.transcription_units),
        vec!["ECOLI:TU0-1181", "ECOLI:TU00089"]
    );
    assert_eq!(summary.source, Upstream::BioCyc);
    assert_eq!(summary.fetched_at, common::start());
    assert_eq!(setup.login.logins.load(Ordering::SeqCst), 1);
    assert_eq!(setup.client.requests().len(), 5);
}

#[test]
fn failed_follow_up_leaves_an_empty_list() {
    let setup = setup(FixtureClient {
        failing: Some(FollowUp::Regulators),
        ..FixtureClient::default()
    });
    let summary = setup
        .adapter
        .regulation(&query("dnaA", "Escherichia coli"))
        .unwrap();
    assert!(summary.regulators.is_empty());
    assert_eq!(summary.regulated_genes.len(), 2);
    assert_eq!(summary.transcription_units.len(), 2);
}

#[test]
fn rejected_cookie_triggers_one_new_login() {
    let setup = setup(FixtureClient {
        rejected_cookie: Some("PTools-session=s1"),
        ..FixtureClient::default()
    });
    let summary = setup
        .adapter
        .regulation(&query("dnaA", "Escherichia coli"))
        .unwrap();

    assert_eq!(summary.gene_id, "ECOLI:EG10235");
    assert_eq!(setup.login.logins.load(Ordering::SeqCst), 2);
    let requests = setup.client.requests();
    assert_eq!(requests[0], ("xmlquery".to_string(), "PTools-session=s1".to_string()));
    assert!(requests[1..].iter().all(|(_, cookie)| cookie == "PTools-session=s2"));
}

#[test]
fn unknown_gene_is_not_found() {
    let setup = setup(FixtureClient::default());
    let err = setup
        .adapter
        .regulation(&query("doesnotexist123", "Escherichia coli"))
        .unwrap_err();
    assert_matches!(err, KiraError::GeneNotFound { .. });
    assert_eq!(setup.client.requests().len(), 1);
}

#[test]
fn organism_without_database_is_rejected() {
    let setup = setup(FixtureClient::default());
    let err = setup
        .adapter
        .regulation(&query("unc-22", "Caenorhabditis elegans"))
        .unwrap_err();
    assert_matches!(err, KiraError::InvalidRequest(_));
    assert!(setup.client.requests().is_empty());
    assert_eq!(setup.login.logins.load(Ordering::SeqCst), 0);
}

#[test]
fn one_login_serves_several_genes() {
    let setup = setup(FixtureClient::default());
    setup
        .adapter
        .regulation(&query("dnaA", "Escherichia coli"))
        .unwrap();
    setup.harness.clock.advance(Duration::from_secs(10 * 60));
    let _ = setup.adapter.regulation(&query("dnaN", "Escherichia coli"));

    assert_eq!(setup.login.logins.load(Ordering::SeqCst), 1);
}

#[test]
fn repeated_lookup_is_served_from_cache() {
    let setup = setup(FixtureClient::default());
    let first = setup
        .adapter
        .regulation(&query("dnaA", "Escherichia coli"))
        .unwrap();
    let second = setup
        .adapter
        .regulation(&query("dnaA", "Escherichia coli"))
        .unwrap();
    assert_eq!(first.regulators, second.regulators);
    assert_eq!(setup.client.requests().len(), 5);
}

#[test]
fn open_access_configuration_skips_login() {
    let mut config = RateLimitTable::default().get(Upstream::BioCyc);
    config.requires_auth = false;
    let harness = Harness::with_parts(
        MemoryStore::new(),
        RateLimitTable::default().with_config(Upstream::BioCyc, config),
    );
    let setup = setup_with(harness, FixtureClient::default());
    let summary = setup
        .adapter
        .regulation(&query("dnaA", "Escherichia coli"))
        .unwrap();

    assert_eq!(summary.gene_id, "ECOLI:EG10235");
    assert_eq!(setup.login.logins.load(Ordering::SeqCst), 0);
    assert!(setup.client.requests().iter().all(|(_, cookie)| cookie.is_empty()));
}
