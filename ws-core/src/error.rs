pub use anyhow::bail;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Error taxonomy shared by the provisioning and activity layers.
///
/// `Infrastructure` and `StartupFailure` render their message verbatim because
/// the message is what the workspace owner ends up reading.
#[derive(Error, Debug)]
pub enum WsError {
    /// Cluster unreachable, watch closed unexpectedly, create/delete failed.
    Infrastructure(String),
    /// Duplicate record creation.
    Conflict(String),
    /// Workspace or record absent.
    NotFound(String),
    /// A runtime object reached a decisive non-running phase.
    StartupFailure(String),
    Config(String),
    Database(String),
    Internal(String),
    Io(#[from] std::io::Error),
    Serialization(String),
    Other(#[from] anyhow::Error),
}

impl Display for WsError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            WsError::Infrastructure(s) => write!(f, "{}", s),
            WsError::Conflict(s) => write!(f, "Conflict: {}", s),
            WsError::NotFound(s) => write!(f, "Not found: {}", s),
            WsError::StartupFailure(s) => write!(f, "{}", s),
            WsError::Config(s) => write!(f, "Configuration error: {}", s),
            WsError::Database(s) => write!(f, "Database error: {}", s),
            WsError::Internal(s) => write!(f, "Internal error: {}", s),
            WsError::Io(e) => write!(f, "I/O error: {}", e),
            WsError::Serialization(s) => write!(f, "Serialization error: {}", s),
            WsError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl WsError {
    pub fn infrastructure(msg: impl Into<String>) -> Self {
        WsError::Infrastructure(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WsError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, WsError::Conflict(_))
    }
}

impl From<serde_json::Error> for WsError {
    fn from(err: serde_json::Error) -> Self {
        WsError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WsError>;
