use std::path::PathBuf;

use crate::verification::SignatureError;

/// Failures surfaced by the gateway core. The router turns each kind into a
/// transport status; only the message crosses that boundary.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Target owner/repo is not configured.
    #[error("{0}")]
    Configuration(String),

    /// Missing credential, or the upstream rejected it (401/403).
    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    NotFound(String),

    /// Upstream quota is exhausted; the caller decides when to retry.
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after: Option<String>,
    },

    /// Conditional listing matched the cached validator.
    #[error("not modified")]
    NotModified,

    /// Any other upstream failure, including transport errors and timeouts.
    #[error("{0}")]
    Upstream(String),

    /// Request shape rejected before reaching the core.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration",
            GatewayError::Auth(_) | GatewayError::Signature(_) => "auth",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::NotModified => "not_modified",
            GatewayError::Upstream(_) => "upstream",
            GatewayError::Validation(_) => "validation",
            GatewayError::Store(_) => "store",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize event record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("event store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
