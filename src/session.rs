//! Login session for the authenticated pathway/regulation registry.
//!
//! Session material lives in process memory first and the persisted store
//! second. It is never handed out within [`SESSION_MARGIN`] of expiry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::SET_COOKIE;
use serde::{Deserialize, Serialize};

use crate::config::BioCycCredentials;
use crate::domain::Upstream;
use crate::error::KiraError;
use crate::http::HttpClient;
use crate::runtime::{Clock, lock, to_chrono};
use crate::store::PersistentStore;

pub const SESSION_VALIDITY: Duration = Duration::from_secs(60 * 60);
pub const SESSION_MARGIN: Duration = Duration::from_secs(5 * 60);
pub const BIOCYC_SESSION_ID: &str = "biocyc";

const BIOCYC_LOGIN_URL: &str = "https://websvc.biocyc.org/credentials/login/";

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub cookie: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("cookie", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Absent,
    Valid,
    Expiring,
    Expired,
}

impl AuthSession {
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if now >= self.expires_at {
            SessionState::Expired
        } else if now >= self.expires_at - to_chrono(SESSION_MARGIN) {
            SessionState::Expiring
        } else {
            SessionState::Valid
        }
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == SessionState::Valid
    }
}

pub trait LoginClient: Send + Sync {
    /// Submits credentials and returns the cookie material to replay.
    fn login(&self, credentials: &BioCycCredentials) -> Result<String, KiraError>;
}

pub struct BioCycLoginClient {
    http: HttpClient,
    timeout: Duration,
}

impl BioCycLoginClient {
    pub fn new(timeout: Duration) -> Result<Self, KiraError> {
        Ok(Self {
            http: HttpClient::new(Upstream::BioCyc)?,
            timeout,
        })
    }
}

impl LoginClient for BioCycLoginClient {
    fn login(&self, credentials: &BioCycCredentials) -> Result<String, KiraError> {
        let form = [
            ("email", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];
        let response = self
            .http
            .client()
            .post(BIOCYC_LOGIN_URL)
            .form(&form)
            .timeout(self.timeout)
            .send()
            .map_err(|err| KiraError::Auth(format!("BioCyc login request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(KiraError::Auth(format!(
                "BioCyc login rejected with status {}",
                status.as_u16()
            )));
        }
        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>();
        cookie_header(&cookies)
            .ok_or_else(|| KiraError::Auth("BioCyc login returned no session cookie".to_string()))
    }
}

/// Joins the `name=value` part of each `Set-Cookie` header into one
/// `Cookie` header value.
pub fn cookie_header(set_cookies: &[&str]) -> Option<String> {
    let pairs = set_cookies
        .iter()
        .filter_map(|raw| raw.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('=') && !pair.starts_with('='))
        .collect::<Vec<_>>();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

pub struct SessionManager {
    login: Arc<dyn LoginClient>,
    credentials: Option<BioCycCredentials>,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<AuthSession>>,
}

impl SessionManager {
    pub fn new(
        login: Arc<dyn LoginClient>,
        credentials: Option<BioCycCredentials>,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            login,
            credentials,
            store,
            clock,
            cached: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        lock(&self.cached)
            .as_ref()
            .map(|session| session.state(self.clock.now()))
            .unwrap_or(SessionState::Absent)
    }

    /// Returns usable session material, logging in when none is cached.
    pub fn get_session(&self) -> Result<AuthSession, KiraError> {
        // Held through login so concurrent callers share one login.
        let mut cached = lock(&self.cached);
        let now = self.clock.now();
        if let Some(session) = cached.as_ref().filter(|s| s.is_usable(now)) {
            return Ok(session.clone());
        }

        match self.store.get_session(BIOCYC_SESSION_ID) {
            Ok(Some(session)) if session.is_usable(now) => {
                tracing::debug!("reusing persisted BioCyc session");
                *cached = Some(session.clone());
                return Ok(session);
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "session store unavailable"),
        }

        let session = self.login()?;
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Drops cached material so the next call logs in again.
    pub fn invalidate(&self) {
        let mut cached = lock(&self.cached);
        if let Some(session) = cached.take() {
            let expired = AuthSession {
                expires_at: self.clock.now(),
                ..session
            };
            if let Err(err) = self.store.put_session(BIOCYC_SESSION_ID, &expired) {
                tracing::debug!(error = %err, "session store unavailable");
            }
        }
    }

    fn login(&self) -> Result<AuthSession, KiraError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            KiraError::Auth("BioCyc credentials are not configured".to_string())
        })?;
        tracing::info!(user = %credentials.username, "logging in to BioCyc");
        let cookie = self.login.login(credentials)?;
        let session = AuthSession {
            cookie,
            expires_at: self.clock.now() + to_chrono(SESSION_VALIDITY),
        };
        if let Err(err) = self.store.put_session(BIOCYC_SESSION_ID, &session) {
            tracing::debug!(error = %err, "session not persisted");
        }
        Ok(session)
    }
}
