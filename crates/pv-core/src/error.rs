//! Error types for pv-core.

use thiserror::Error;

/// Result type alias using pv-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for privoice operations
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors
    #[error("Channel name too long: {length} > {limit}")]
    NameTooLong { length: usize, limit: usize },

    #[error("Parent channel already has a voice channel: {existing}")]
    DuplicateParent { existing: String },

    #[error("Cannot create a voice channel from {0}")]
    InvalidParent(String),

    #[error("A voice channel is already being created for {0}")]
    CreationInProgress(String),

    // Platform errors
    #[error("Platform error: {0}")]
    Platform(String),

    #[cfg(feature = "discord")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited for {retry_after_ms}ms on {route}")]
    RateLimited { route: String, retry_after_ms: u64 },

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Gateway error: {0}")]
    Gateway(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a platform error from anything printable
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform(message.into())
    }

    /// Create a gateway error
    pub fn gateway(message: impl Into<String>) -> Self {
        Self::Gateway(message.into())
    }

    /// True for failures the issuer caused (bad title, duplicate room, wrong channel)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NameTooLong { .. }
                | Self::DuplicateParent { .. }
                | Self::InvalidParent(_)
                | Self::CreationInProgress(_)
        )
    }

    /// True when the platform reports that the target no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
