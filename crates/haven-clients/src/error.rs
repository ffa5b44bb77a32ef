use thiserror::Error;

use haven_core::HavenError;

/// Upstream adapter failures, one variant per taxonomy kind. Adapters
/// classify transport and status errors here; higher layers convert to
/// `HavenError` unchanged.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} timed out after {ms}ms")]
    Timeout { service: &'static str, ms: u64 },

    #[error("{service} rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        service: &'static str,
        retry_after_ms: u64,
    },

    #[error("{service} server error ({status})")]
    Upstream5xx { service: &'static str, status: u16 },

    #[error("{service} rejected request ({status}): {message}")]
    Bad4xx {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} network error: {message}")]
    Network {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned malformed payload: {message}")]
    Parse {
        service: &'static str,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// Classify a reqwest transport error. URLs are stripped before the
    /// message is kept so credentials in query strings never reach logs.
    pub fn from_reqwest(service: &'static str, timeout_ms: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout {
                service,
                ms: timeout_ms,
            }
        } else {
            ClientError::Network {
                service,
                message: err.without_url().to_string(),
            }
        }
    }

    /// Classify a non-success HTTP status into the taxonomy.
    pub fn from_status(
        service: &'static str,
        status: u16,
        retry_after_ms: Option<u64>,
        body: String,
    ) -> Self {
        if status == 429 {
            ClientError::RateLimited {
                service,
                retry_after_ms: retry_after_ms.unwrap_or(5000),
            }
        } else if status >= 500 {
            ClientError::Upstream5xx { service, status }
        } else {
            // keep only the head of the upstream body
            let mut message = body;
            message.truncate(200);
            ClientError::Bad4xx {
                service,
                status,
                message,
            }
        }
    }

    pub fn service(&self) -> &'static str {
        match self {
            ClientError::Timeout { service, .. }
            | ClientError::RateLimited { service, .. }
            | ClientError::Upstream5xx { service, .. }
            | ClientError::Bad4xx { service, .. }
            | ClientError::Network { service, .. }
            | ClientError::Parse { service, .. } => service,
            ClientError::Cancelled => "none",
        }
    }
}

impl From<ClientError> for HavenError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout { ms, .. } => HavenError::Timeout { ms },
            ClientError::RateLimited { retry_after_ms, .. } => {
                HavenError::RateLimited { retry_after_ms }
            }
            ClientError::Upstream5xx { service, status } => HavenError::Upstream5xx {
                service: service.to_string(),
                status,
            },
            ClientError::Bad4xx {
                service, status, ..
            } => HavenError::Bad4xx {
                service: service.to_string(),
                status,
            },
            ClientError::Network { message, .. } => HavenError::Network(message),
            ClientError::Parse { service, message } => {
                HavenError::Internal(format!("{service} payload: {message}"))
            }
            ClientError::Cancelled => HavenError::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
