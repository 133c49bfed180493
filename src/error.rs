use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::Upstream;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid gene symbol: {0}")]
    InvalidGeneSymbol(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("gene {symbol} not found for {organism}")]
    GeneNotFound { symbol: String, organism: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("{api} request failed: {message}")]
    UpstreamHttp { api: Upstream, message: String },

    #[error("{api} returned status {status}: {message}")]
    UpstreamStatus {
        api: Upstream,
        status: u16,
        message: String,
    },

    #[error("{api} request timed out after {timeout_ms} ms")]
    UpstreamTimeout { api: Upstream, timeout_ms: u64 },

    #[error("{api} rate limit exceeded")]
    RateLimited {
        api: Upstream,
        retry_after: Option<u64>,
    },

    #[error("failed to parse {api} response: {message}")]
    UpstreamParse { api: Upstream, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Client-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Validation,
    RateLimited,
    ExternalApi,
    Timeout,
    Auth,
    Internal,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::NotFound,
        ErrorCategory::Validation,
        ErrorCategory::RateLimited,
        ErrorCategory::ExternalApi,
        ErrorCategory::Timeout,
        ErrorCategory::Auth,
        ErrorCategory::Internal,
    ];

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.code() == code)
    }

    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "NOT_FOUND",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::RateLimited => "RATE_LIMITED",
            ErrorCategory::ExternalApi => "EXTERNAL_API",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorCategory::NotFound => 404,
            ErrorCategory::Validation => 400,
            ErrorCategory::RateLimited => 429,
            ErrorCategory::ExternalApi => 502,
            ErrorCategory::Timeout => 504,
            ErrorCategory::Auth => 401,
            ErrorCategory::Internal => 500,
        }
    }

    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimited
                | ErrorCategory::ExternalApi
                | ErrorCategory::Timeout
                | ErrorCategory::Internal
        )
    }
}

impl KiraError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            KiraError::InvalidGeneSymbol(_) | KiraError::InvalidRequest(_) => {
                ErrorCategory::Validation
            }
            KiraError::GeneNotFound { .. } => ErrorCategory::NotFound,
            KiraError::UpstreamHttp { .. }
            | KiraError::UpstreamStatus { .. }
            | KiraError::UpstreamParse { .. } => ErrorCategory::ExternalApi,
            KiraError::UpstreamTimeout { .. } => ErrorCategory::Timeout,
            KiraError::RateLimited { .. } => ErrorCategory::RateLimited,
            KiraError::Auth(_) => ErrorCategory::Auth,
            KiraError::ConfigRead(_)
            | KiraError::ConfigParse(_)
            | KiraError::Store(_)
            | KiraError::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            KiraError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn upstream(&self) -> Option<Upstream> {
        match self {
            KiraError::UpstreamHttp { api, .. }
            | KiraError::UpstreamStatus { api, .. }
            | KiraError::UpstreamTimeout { api, .. }
            | KiraError::RateLimited { api, .. }
            | KiraError::UpstreamParse { api, .. } => Some(*api),
            _ => None,
        }
    }

    /// True for a non-success answer that only means "nothing here".
    pub fn is_upstream_not_found(&self) -> bool {
        matches!(self, KiraError::UpstreamStatus { status: 404, .. })
    }
}
