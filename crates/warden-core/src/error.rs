//! Error types shared across the Warden workspace.

use thiserror::Error;

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error taxonomy.
///
/// Connectivity failures are normal, expected outcomes for device I/O and
/// are recovered locally (`test_connection` returns `false` rather than
/// propagating them). Validation and conflict errors surface to API
/// clients as 4xx responses.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or scope
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unique-key or state conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Device unreachable or command timed out
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Vendor adapter reported a failure
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Device is registered but disabled for command execution
    #[error("Device is inactive: {0}")]
    Inactive(String),

    /// Persistence layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Credential encryption/decryption failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error maps to a client-visible 4xx class response.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Validation(_) | Self::Conflict(_) | Self::Inactive(_)
        )
    }

    /// Whether this error represents a connectivity (not business) failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::Validation("bad branch".into()).is_client_error());
        assert!(Error::NotFound("device".into()).is_client_error());
        assert!(!Error::Connectivity("timeout".into()).is_client_error());
        assert!(!Error::Storage("redb".into()).is_client_error());
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(Error::Connectivity("unreachable".into()).is_connectivity());
        assert!(!Error::Adapter("bad command".into()).is_connectivity());
    }
}
