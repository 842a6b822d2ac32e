//! Error types returned across the remote-service seam.

use thiserror::Error;

/// A failure reported by the backend-as-a-service.
///
/// The `Display` text is the human-readable message that ends up in a toast or
/// an error slot, so variants carry the backend's own wording verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The request never completed (offline, DNS, TLS, timeout).
    #[error("{0}")]
    Network(String),

    /// Credentials or a one-time code were refused.
    #[error("{0}")]
    Rejected(String),

    /// The write conflicted with existing data (duplicate account, row-level policy).
    #[error("{0}")]
    Conflict(String),

    /// The addressed row or account does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The backend refused to serve this request right now.
    #[error("{0}")]
    Unavailable(String),
}

/// Failure while loading [`crate::ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown value for {key}: {value}")]
    UnknownValue { key: &'static str, value: String },
}
