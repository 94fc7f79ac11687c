//! Collaborators owned by the workspace master: the workspace registry and
//! the live runtime view. The activity layer only talks to them through
//! these traits.

use crate::model::WorkspaceStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ws_core::Result;

/// Attribute holding the workspace creation time in epoch milliseconds.
pub const CREATED_ATTRIBUTE: &str = "created";
/// Attribute recording who stopped the workspace.
pub const STOPPED_BY_ATTRIBUTE: &str = "stopped_by";
/// Value of [`STOPPED_BY_ATTRIBUTE`] when the reconciler stops a workspace.
pub const ACTIVITY_CHECKER: &str = "activity-checker";
/// Stop option carrying the human-readable stop reason.
pub const STOP_REASON: &str = "stop_reason";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Workspace {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The `created` attribute, if present and numeric.
    pub fn created_time(&self) -> Option<i64> {
        self.attribute(CREATED_ATTRIBUTE)
            .and_then(|value| value.trim().parse().ok())
    }
}

#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// [`ws_core::WsError::NotFound`] if no such workspace exists.
    async fn get_workspace(&self, workspace_id: &str) -> Result<Workspace>;

    async fn update_workspace(&self, workspace: Workspace) -> Result<Workspace>;

    /// [`ws_core::WsError::Conflict`] if the workspace is not in a stoppable state.
    async fn stop_workspace(
        &self,
        workspace_id: &str,
        options: BTreeMap<String, String>,
    ) -> Result<()>;
}

#[async_trait]
pub trait WorkspaceRuntimes: Send + Sync {
    /// Ids of workspaces the cluster currently reports as running.
    async fn running(&self) -> Result<Vec<String>>;

    /// Live status; workspaces without a runtime are `Stopped`.
    async fn status_of(&self, workspace_id: &str) -> Result<WorkspaceStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_time_parsing() {
        assert_eq!(
            Workspace::new("ws1").with_attribute(CREATED_ATTRIBUTE, "1000").created_time(),
            Some(1000)
        );
        assert_eq!(
            Workspace::new("ws1").with_attribute(CREATED_ATTRIBUTE, "yesterday").created_time(),
            None
        );
        assert_eq!(Workspace::new("ws1").created_time(), None);
    }
}
