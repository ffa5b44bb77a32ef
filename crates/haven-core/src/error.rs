use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum HavenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation failed: {}", details.join("; "))]
    ValidationFailed { details: Vec<String> },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Upstream {service} returned {status}")]
    Upstream5xx { service: String, status: u16 },

    #[error("Upstream {service} rejected request ({status})")]
    Bad4xx { service: String, status: u16 },

    #[error("Missing or invalid credential: {0}")]
    AuthMisconfig(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HavenError {
    /// Short error code string used in JSON error envelopes and stats keys.
    pub fn code(&self) -> &'static str {
        match self {
            HavenError::Config(_) => "CONFIG_ERROR",
            HavenError::ValidationFailed { .. } => "VALIDATION_FAILED",
            HavenError::Timeout { .. } => "TIMEOUT",
            HavenError::RateLimited { .. } => "RATE_LIMITED",
            HavenError::Upstream5xx { .. } => "UPSTREAM_5XX",
            HavenError::Bad4xx { .. } => "UPSTREAM_4XX",
            HavenError::AuthMisconfig(_) => "AUTH_MISCONFIG",
            HavenError::Network(_) => "NETWORK_ERROR",
            HavenError::Cancelled => "CANCELLED",
            HavenError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HavenError::Timeout { .. }
                | HavenError::RateLimited { .. }
                | HavenError::Upstream5xx { .. }
                | HavenError::Network(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, HavenError>;
