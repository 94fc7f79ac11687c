//! Test fixtures: an in-memory SQLite pool and a scripted workspace master.

use crate::model::WorkspaceStatus;
use crate::workspace::{Workspace, WorkspaceManager, WorkspaceRuntimes};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use ws_core::{Result, WsError};

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// A stop request received by [`FakeWorkspaces`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRequest {
    pub workspace_id: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Default)]
struct FakeState {
    workspaces: HashMap<String, Workspace>,
    statuses: HashMap<String, WorkspaceStatus>,
    stop_errors: HashMap<String, WsError>,
    stops: Vec<StopRequest>,
    runtime_error: Option<String>,
    status_error: Option<String>,
}

/// Workspace registry and runtime view in one, scripted per test.
#[derive(Default)]
pub struct FakeWorkspaces {
    state: Mutex<FakeState>,
}

impl FakeWorkspaces {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn add(&self, workspace: Workspace, status: WorkspaceStatus) {
        let mut state = self.state();
        state.statuses.insert(workspace.id.clone(), status);
        state.workspaces.insert(workspace.id.clone(), workspace);
    }

    /// A runtime the registry knows nothing about.
    pub fn add_runtime_only(&self, workspace_id: &str, status: WorkspaceStatus) {
        self.state().statuses.insert(workspace_id.to_string(), status);
    }

    pub fn set_status(&self, workspace_id: &str, status: WorkspaceStatus) {
        self.state().statuses.insert(workspace_id.to_string(), status);
    }

    pub fn fail_stop(&self, workspace_id: &str, err: WsError) {
        self.state().stop_errors.insert(workspace_id.to_string(), err);
    }

    pub fn fail_runtimes(&self, message: &str) {
        self.state().runtime_error = Some(message.to_string());
    }

    /// Make every `status_of` lookup fail.
    pub fn fail_status(&self, message: &str) {
        self.state().status_error = Some(message.to_string());
    }

    pub fn workspace(&self, workspace_id: &str) -> Option<Workspace> {
        self.state().workspaces.get(workspace_id).cloned()
    }

    pub fn stops(&self) -> Vec<StopRequest> {
        self.state().stops.clone()
    }
}

fn copy_error(err: &WsError) -> WsError {
    match err {
        WsError::NotFound(s) => WsError::NotFound(s.clone()),
        WsError::Conflict(s) => WsError::Conflict(s.clone()),
        WsError::Infrastructure(s) => WsError::Infrastructure(s.clone()),
        other => WsError::Internal(other.to_string()),
    }
}

#[async_trait]
impl WorkspaceManager for FakeWorkspaces {
    async fn get_workspace(&self, workspace_id: &str) -> Result<Workspace> {
        self.state()
            .workspaces
            .get(workspace_id)
            .cloned()
            .ok_or_else(|| WsError::NotFound(format!("Workspace '{}' not found", workspace_id)))
    }

    async fn update_workspace(&self, workspace: Workspace) -> Result<Workspace> {
        let mut state = self.state();
        if !state.workspaces.contains_key(&workspace.id) {
            return Err(WsError::NotFound(format!("Workspace '{}' not found", workspace.id)));
        }
        state.workspaces.insert(workspace.id.clone(), workspace.clone());
        Ok(workspace)
    }

    async fn stop_workspace(
        &self,
        workspace_id: &str,
        options: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state();
        state.stops.push(StopRequest {
            workspace_id: workspace_id.to_string(),
            options,
        });
        if let Some(err) = state.stop_errors.get(workspace_id) {
            return Err(copy_error(err));
        }
        state
            .statuses
            .insert(workspace_id.to_string(), WorkspaceStatus::Stopped);
        Ok(())
    }
}

#[async_trait]
impl WorkspaceRuntimes for FakeWorkspaces {
    async fn running(&self) -> Result<Vec<String>> {
        let state = self.state();
        if let Some(message) = &state.runtime_error {
            return Err(WsError::infrastructure(message.clone()));
        }
        let mut ids: Vec<String> = state
            .statuses
            .iter()
            .filter(|(_, status)| **status == WorkspaceStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn status_of(&self, workspace_id: &str) -> Result<WorkspaceStatus> {
        let state = self.state();
        if let Some(message) = &state.status_error {
            return Err(WsError::infrastructure(message.clone()));
        }
        Ok(state
            .statuses
            .get(workspace_id)
            .copied()
            .unwrap_or(WorkspaceStatus::Stopped))
    }
}
