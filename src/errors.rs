//! Error taxonomy shared across the runtime.
//!
//! Library functions translate known provider and database conditions into
//! [`CoreError`] variants and propagate everything else. The CLI maps each
//! variant to a stable exit code.

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type CoreResult<T> = Result<T, CoreError>;

/// The unified error taxonomy.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad stage for type, invalid enum value, or referential mismatch.
    #[error("validation error: {0}")]
    Validation(String),

    /// A required credential could not be resolved.
    #[error("missing required credential: {0}")]
    MissingCredential(String),

    /// An upstream provider responded with a non-success status.
    #[error("provider returned HTTP {status}: {body}")]
    ProviderHttp {
        /// HTTP status code (0 when the transport failed before a response).
        status: u16,
        /// Sanitised response body.
        body: String,
    },

    /// A provider call exceeded its deadline.
    #[error("provider request timed out: {0}")]
    Timeout(String),

    /// Malformed input that was expected to parse (transcript line, JSON).
    #[error("parse error: {0}")]
    Parse(String),

    /// Database constraint violation or I/O failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// An entity id does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CoreError {
    /// Returns `true` when the provider fallback chain should continue.
    ///
    /// Retryable conditions: HTTP 429/503, bodies mentioning quota or rate
    /// limits, and timeouts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::ProviderHttp { status, body } => {
                if matches!(status, 429 | 503) {
                    return true;
                }
                let lower = body.to_lowercase();
                lower.contains("quota") || lower.contains("rate limit")
            }
            _ => false,
        }
    }

    /// Exit code for CLI surfacing: 1 validation, 2 missing credential,
    /// 3 provider failure after fallbacks.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingCredential(_) => 2,
            Self::ProviderHttp { .. } | Self::Timeout(_) => 3,
            Self::Validation(_) | Self::Parse(_) | Self::Storage(_) | Self::NotFound(_) => 1,
        }
    }

    /// Short category name printed on the CLI error line.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::MissingCredential(_) => "missing-credential",
            Self::ProviderHttp { .. } => "provider",
            Self::Timeout(_) => "timeout",
            Self::Parse(_) => "parse",
            Self::Storage(_) => "storage",
            Self::NotFound(_) => "not-found",
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(err.to_string());
        }
        let status = err.status().map(|s| s.as_u16()).unwrap_or(0);
        Self::ProviderHttp {
            status,
            body: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
