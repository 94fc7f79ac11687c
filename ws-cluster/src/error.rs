//! Error types for cluster client operations.

use thiserror::Error;
use ws_core::WsError;

/// Errors reported by a [`crate::ClusterClient`].
#[derive(Error, Debug, Clone)]
pub enum ClusterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Cluster API error: {0}")]
    Api(String),

    #[error("Cluster transport error: {0}")]
    Transport(String),

    #[error("Malformed cluster response: {0}")]
    Serialization(String),

    /// Failure that did not come from the control plane at all.
    #[error("{0}")]
    Unexpected(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, ClusterError::Forbidden(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists(_))
    }

    /// True for errors raised by the cluster itself (as opposed to local failures).
    pub fn is_cluster_error(&self) -> bool {
        !matches!(self, ClusterError::Unexpected(_))
    }

    /// The underlying message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            ClusterError::NotFound(m)
            | ClusterError::Forbidden(m)
            | ClusterError::AlreadyExists(m)
            | ClusterError::Api(m)
            | ClusterError::Transport(m)
            | ClusterError::Serialization(m)
            | ClusterError::Unexpected(m) => m,
        }
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::Serialization(err.to_string())
    }
}

impl From<ClusterError> for WsError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Unexpected(msg) => WsError::Internal(msg),
            other => WsError::Infrastructure(other.to_string()),
        }
    }
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;
