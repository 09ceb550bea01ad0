//! Error types for the cluster intelligence subsystem

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cluster intelligence
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    // Graph store errors
    #[error("Graph store error: {0}")]
    Store(String),

    #[error("Graph store timeout after {timeout_ms}ms during {operation}")]
    StoreTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Invalid relationship edge: {0}")]
    InvalidEdge(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Check if this error came from the graph store (query/write failed or timed out)
    ///
    /// Transient errors are contained by the step that hit them and are never
    /// retried within the same onboarding run.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store(_) | Error::StoreTimeout { .. })
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Store("down".into()).is_transient());
        assert!(Error::StoreTimeout {
            operation: "neighbors",
            timeout_ms: 2000
        }
        .is_transient());
        assert!(!Error::InvalidAddress("bad".into()).is_transient());
        assert!(!Error::ClusterNotFound("c".into()).is_transient());
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::StoreTimeout {
            operation: "cluster_of",
            timeout_ms: 500,
        };
        assert_eq!(
            err.to_string(),
            "Graph store timeout after 500ms during cluster_of"
        );
    }
}
