use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use serde_json::Value;

use crate::domain::Upstream;
use crate::error::KiraError;

/// Blocking HTTP client for one upstream. Every failure is mapped onto a
/// tagged `KiraError` variant carrying the upstream it came from.
#[derive(Clone)]
pub struct HttpClient {
    api: Upstream,
    client: Client,
}

impl HttpClient {
    pub fn new(api: Upstream) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ga/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Internal(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| KiraError::UpstreamHttp {
                api,
                message: err.to_string(),
            })?;
        Ok(Self { api, client })
    }

    pub fn api(&self) -> Upstream {
        self.api
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        deadline: Duration,
    ) -> Result<Value, KiraError> {
        let response = self.send(deadline, self.client.get(url).query(query))?;
        let response = self.handle_status(response)?;
        response.json().map_err(|err| self.map_error(err, deadline))
    }

    pub fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        cookie: Option<&str>,
        deadline: Duration,
    ) -> Result<String, KiraError> {
        let request = self.client.get(url).query(query);
        let request = match cookie {
            Some(value) => request.header(COOKIE, value),
            None => request,
        };
        let response = self.send(deadline, request)?;
        let response = self.handle_status(response)?;
        response.text().map_err(|err| self.map_error(err, deadline))
    }

    pub fn post_json(
        &self,
        url: &str,
        body: &Value,
        deadline: Duration,
    ) -> Result<Option<Value>, KiraError> {
        let response = self.send(deadline, self.client.post(url).json(body))?;
        // RCSB search answers 204 when nothing matches.
        if response.status().as_u16() == 204 {
            return Ok(None);
        }
        let response = self.handle_status(response)?;
        response
            .json()
            .map(Some)
            .map_err(|err| self.map_error(err, deadline))
    }

    /// Sends one request bounded by `deadline`. Retrying is left to the
    /// caller so every attempt goes back through the rate limiter.
    pub fn send(&self, deadline: Duration, request: RequestBuilder) -> Result<Response, KiraError> {
        request
            .timeout(deadline)
            .send()
            .map_err(|err| self.map_error(err, deadline))
    }

    pub fn handle_status(&self, response: Response) -> Result<Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        if status == 429 {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            return Err(KiraError::RateLimited {
                api: self.api,
                retry_after,
            });
        }
        let message = response
            .text()
            .map(|body| truncate(&body, 300))
            .unwrap_or_else(|_| format!("{} request failed", self.api));
        Err(KiraError::UpstreamStatus {
            api: self.api,
            status,
            message,
        })
    }

    fn map_error(&self, err: reqwest::Error, deadline: Duration) -> KiraError {
        if err.is_timeout() {
            KiraError::UpstreamTimeout {
                api: self.api,
                timeout_ms: deadline.as_millis() as u64,
            }
        } else if err.is_decode() {
            KiraError::UpstreamParse {
                api: self.api,
                message: err.to_string(),
            }
        } else {
            KiraError::UpstreamHttp {
                api: self.api,
                message: err.to_string(),
            }
        }
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}
