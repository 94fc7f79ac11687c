//! Workspace master backed by the cluster itself.
//!
//! A workspace is the set of pods labelled with its id. Its live status is
//! derived from those pods, its `created` attribute from the oldest of them.
//! Attributes written by the activity layer are kept in process.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};
use ws_activity::workspace::{CREATED_ATTRIBUTE, STOP_REASON};
use ws_activity::{
    EventBus, Workspace, WorkspaceEvent, WorkspaceManager, WorkspaceRuntimes, WorkspaceStatus,
};
use ws_cluster::{
    ClusterClient, ClusterObject, LabelSelector, NamespaceProvisioner, NamespaceResolver, PodPhase,
    ResourceKind, WORKSPACE_ID_LABEL,
};
use ws_core::{Result, WsError};

pub struct ClusterWorkspaces {
    client: Arc<dyn ClusterClient>,
    resolver: NamespaceResolver,
    provisioner: NamespaceProvisioner,
    events: Arc<EventBus>,
    attributes: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

/// Live status of a workspace from its pods.
fn status_of_pods(pods: &[&ClusterObject]) -> WorkspaceStatus {
    if pods.is_empty() {
        WorkspaceStatus::Stopped
    } else if pods.iter().any(|pod| pod.is_terminating()) {
        WorkspaceStatus::Stopping
    } else if pods.iter().all(|pod| pod.pod_phase() == PodPhase::Running) {
        WorkspaceStatus::Running
    } else {
        WorkspaceStatus::Starting
    }
}

impl ClusterWorkspaces {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        resolver: NamespaceResolver,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            provisioner: NamespaceProvisioner::new(client.clone()),
            client,
            resolver,
            events,
            attributes: Mutex::new(HashMap::new()),
        }
    }

    fn attributes(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<String, String>>> {
        self.attributes.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn pods(&self, workspace_id: &str) -> Result<Vec<ClusterObject>> {
        let namespace = self.resolver.resolve(workspace_id);
        Ok(self
            .client
            .list(
                ResourceKind::Pod,
                Some(&namespace.name),
                &LabelSelector::workspace(workspace_id),
            )
            .await?)
    }
}

#[async_trait]
impl WorkspaceManager for ClusterWorkspaces {
    async fn get_workspace(&self, workspace_id: &str) -> Result<Workspace> {
        let pods = self.pods(workspace_id).await?;
        let stored = self.attributes().get(workspace_id).cloned();
        if pods.is_empty() && stored.is_none() {
            return Err(WsError::NotFound(format!(
                "Workspace '{}' not found",
                workspace_id
            )));
        }

        let mut workspace = Workspace::new(workspace_id);
        workspace.attributes = stored.unwrap_or_default();
        if let Some(created) = pods
            .iter()
            .filter_map(|pod| pod.metadata.creation_timestamp)
            .min()
        {
            workspace
                .attributes
                .entry(CREATED_ATTRIBUTE.to_string())
                .or_insert_with(|| created.timestamp_millis().to_string());
        }
        Ok(workspace)
    }

    async fn update_workspace(&self, workspace: Workspace) -> Result<Workspace> {
        self.attributes()
            .insert(workspace.id.clone(), workspace.attributes.clone());
        Ok(workspace)
    }

    async fn stop_workspace(
        &self,
        workspace_id: &str,
        options: BTreeMap<String, String>,
    ) -> Result<()> {
        let pods = self.pods(workspace_id).await?;
        let status = status_of_pods(&pods.iter().collect::<Vec<_>>());
        if status == WorkspaceStatus::Stopped || status == WorkspaceStatus::Stopping {
            return Err(WsError::Conflict(format!(
                "Could not stop the workspace '{}' because its status is '{}'.",
                workspace_id, status
            )));
        }

        if let Some(reason) = options.get(STOP_REASON) {
            info!(workspace_id, reason = %reason, "Stopping workspace");
            self.attributes()
                .entry(workspace_id.to_string())
                .or_default()
                .insert(STOP_REASON.to_string(), reason.clone());
        }

        self.events
            .publish(WorkspaceEvent::status_changed(
                workspace_id,
                WorkspaceStatus::Stopping,
                Some(status),
            ))
            .await;

        let namespace = self.resolver.resolve(workspace_id);
        let cleanup = self.provisioner.cleanup(&namespace).await;
        if let Err(e) = &cleanup {
            warn!(workspace_id, "Workspace stopped with errors: {}", e);
        }

        self.events
            .publish(WorkspaceEvent::status_changed(
                workspace_id,
                WorkspaceStatus::Stopped,
                Some(WorkspaceStatus::Stopping),
            ))
            .await;
        cleanup
    }
}

#[async_trait]
impl WorkspaceRuntimes for ClusterWorkspaces {
    async fn running(&self) -> Result<Vec<String>> {
        let pods = self
            .client
            .list(ResourceKind::Pod, None, &LabelSelector::new())
            .await?;

        let mut by_workspace: BTreeMap<&str, Vec<&ClusterObject>> = BTreeMap::new();
        for pod in &pods {
            if let Some(id) = pod.metadata.labels.get(WORKSPACE_ID_LABEL) {
                by_workspace.entry(id.as_str()).or_default().push(pod);
            }
        }

        Ok(by_workspace
            .into_iter()
            .filter(|(_, pods)| status_of_pods(pods) == WorkspaceStatus::Running)
            .map(|(id, _)| id.to_string())
            .collect())
    }

    async fn status_of(&self, workspace_id: &str) -> Result<WorkspaceStatus> {
        let pods = self.pods(workspace_id).await?;
        Ok(status_of_pods(&pods.iter().collect::<Vec<_>>()))
    }
}
