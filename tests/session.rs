mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;

use kira_gene_aggregator::config::BioCycCredentials;
use kira_gene_aggregator::error::KiraError;
use kira_gene_aggregator::runtime::{Clock, ManualClock};
use kira_gene_aggregator::session::{
    BIOCYC_SESSION_ID, LoginClient, SessionManager, SessionState,
};
use kira_gene_aggregator::store::{MemoryStore, PersistentStore};

#[derive(Default)]
struct CountingLogin {
    logins: AtomicUsize,
    reject: bool,
}

impl CountingLogin {
    fn rejecting() -> Self {
        Self {
            logins: AtomicUsize::new(0),
            reject: true,
        }
    }

    fn count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

impl LoginClient for CountingLogin {
    fn login(&self, credentials: &BioCycCredentials) -> Result<String, KiraError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject {
            return Err(KiraError::Auth("BioCyc login rejected with status 403".to_string()));
        }
        // Slow enough for concurrent callers to pile up behind the lock.
        thread::sleep(Duration::from_millis(20));
        Ok(format!("PTools-session={}-{n}", credentials.username))
    }
}

fn credentials() -> Option<BioCycCredentials> {
    Some(BioCycCredentials {
        username: "curator@example.org".to_string(),
        password: "hunter2".to_string(),
    })
}

fn manager(
    login: &Arc<CountingLogin>,
    store: &Arc<MemoryStore>,
    clock: &Arc<ManualClock>,
) -> SessionManager {
    SessionManager::new(login.clone(), credentials(), store.clone(), clock.clone())
}

#[test]
fn two_calls_within_a_minute_log_in_once() {
    let login = Arc::new(CountingLogin::default());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(common::start()));
    let sessions = manager(&login, &store, &clock);

    let first = sessions.get_session().unwrap();
    clock.advance(Duration::from_secs(30));
    let second = sessions.get_session().unwrap();

    assert_eq!(login.count(), 1);
    assert_eq!(first, second);
    assert_eq!(sessions.state(), SessionState::Valid);
}

#[test]
fn concurrent_callers_share_one_login() {
    let login = Arc::new(CountingLogin::default());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(common::start()));
    let sessions = manager(&login, &store, &clock);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| sessions.get_session().unwrap());
        }
    });
    assert_eq!(login.count(), 1);
}

#[test]
fn session_inside_margin_is_renewed() {
    let login = Arc::new(CountingLogin::default());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(common::start()));
    let sessions = manager(&login, &store, &clock);

    sessions.get_session().unwrap();
    clock.advance(Duration::from_secs(56 * 60));
    assert_eq!(sessions.state(), SessionState::Expiring);

    let renewed = sessions.get_session().unwrap();
    assert_eq!(login.count(), 2);
    assert!(renewed.cookie.ends_with("-2"));
}

#[test]
fn persisted_session_is_reused_by_a_new_manager() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(common::start()));

    let first_login = Arc::new(CountingLogin::default());
    manager(&first_login, &store, &clock).get_session().unwrap();

    let second_login = Arc::new(CountingLogin::default());
    let restarted = manager(&second_login, &store, &clock);
    assert_eq!(restarted.state(), SessionState::Absent);
    restarted.get_session().unwrap();
    assert_eq!(second_login.count(), 0);
}

#[test]
fn invalidate_forces_a_new_login() {
    let login = Arc::new(CountingLogin::default());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(common::start()));
    let sessions = manager(&login, &store, &clock);

    sessions.get_session().unwrap();
    sessions.invalidate();
    assert_eq!(sessions.state(), SessionState::Absent);
    let persisted = store.get_session(BIOCYC_SESSION_ID).unwrap().unwrap();
    assert!(!persisted.is_usable(clock.now()));

    sessions.get_session().unwrap();
    assert_eq!(login.count(), 2);
}

#[test]
fn missing_credentials_fail_with_auth() {
    let login = Arc::new(CountingLogin::default());
    let sessions = SessionManager::new(
        login.clone(),
        None,
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::new(common::start())),
    );
    assert_matches!(sessions.get_session(), Err(KiraError::Auth(_)));
    assert_eq!(login.count(), 0);
}

#[test]
fn rejected_login_propagates() {
    let login = Arc::new(CountingLogin::rejecting());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(common::start()));
    let sessions = manager(&login, &store, &clock);
    let err = sessions.get_session().unwrap_err();
    assert_matches!(err, KiraError::Auth(_));
    assert_eq!(sessions.state(), SessionState::Absent);
}

#[test]
fn store_outage_still_yields_a_session() {
    let login = Arc::new(CountingLogin::default());
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);
    let clock = Arc::new(ManualClock::new(common::start()));
    let sessions = manager(&login, &store, &clock);

    sessions.get_session().unwrap();
    sessions.get_session().unwrap();
    assert_eq!(login.count(), 1);
}
