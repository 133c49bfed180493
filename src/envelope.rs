use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCategory, KiraError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-facing error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: RequestId,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorEnvelope {
    pub fn from_error(err: &KiraError, request_id: RequestId) -> Self {
        let category = err.category();
        Self {
            error: ErrorBody {
                code: category.code().to_string(),
                message: err.to_string(),
                request_id,
                retryable: category.retryable(),
                retry_after: err.retry_after(),
            },
        }
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        ErrorCategory::from_code(&self.error.code)
    }

    pub fn http_status(&self) -> u16 {
        self.category()
            .map(ErrorCategory::http_status)
            .unwrap_or(500)
    }

    /// Extra response headers; only `Retry-After` for rate limiting.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match (self.category(), self.error.retry_after) {
            (Some(ErrorCategory::RateLimited), Some(seconds)) => {
                vec![("Retry-After", seconds.to_string())]
            }
            _ => Vec::new(),
        }
    }
}
