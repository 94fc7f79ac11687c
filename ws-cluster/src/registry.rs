//! Per-workspace view of the pods and deployments in a namespace.
//!
//! Every object created through [`RuntimeObjects`] carries the
//! `workspace.id` label so it can be found and removed by selector later.
//! Readiness waits park their watch in a per-name [`WatchSlot`]; deleting a
//! name releases that slot first, which ends the wait with an interruption.

use crate::object::{
    ClusterObject, LabelSelector, PodPhase, PropagationPolicy, ResourceKind, RuntimeKind,
    WatchTarget, DEPLOYMENT_LABEL, WORKSPACE_ID_LABEL,
};
use crate::watch::{Watch, WatchEvent, WatchSlot};
use crate::watcher::{ReadinessFuture, RuntimeObjectWatcher};
use crate::ClusterClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use ws_core::{Result, WsError};

/// How long a delete waits for the cluster to confirm removal.
pub const REMOVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

struct Tracked {
    kind: RuntimeKind,
    slot: Option<WatchSlot>,
}

pub struct RuntimeObjects {
    client: Arc<dyn ClusterClient>,
    watcher: RuntimeObjectWatcher,
    namespace: String,
    workspace_id: String,
    tracked: Mutex<HashMap<String, Tracked>>,
    removal_timeout: Duration,
}

impl RuntimeObjects {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        workspace_id: impl Into<String>,
    ) -> Self {
        Self {
            watcher: RuntimeObjectWatcher::new(client.clone()),
            client,
            namespace: namespace.into(),
            workspace_id: workspace_id.into(),
            tracked: Mutex::new(HashMap::new()),
            removal_timeout: REMOVAL_TIMEOUT,
        }
    }

    pub fn with_removal_timeout(mut self, timeout: Duration) -> Self {
        self.removal_timeout = timeout;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<String, Tracked>> {
        self.tracked.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn track(&self, name: &str, kind: RuntimeKind) {
        self.tracked()
            .insert(name.to_string(), Tracked { kind, slot: None });
    }

    fn kind_of(&self, name: &str) -> RuntimeKind {
        self.tracked()
            .get(name)
            .map(|t| t.kind)
            .unwrap_or(RuntimeKind::Pod)
    }

    fn label(&self, object: ClusterObject) -> ClusterObject {
        object
            .with_label(WORKSPACE_ID_LABEL, self.workspace_id.as_str())
            .in_namespace(self.namespace.as_str())
    }

    /// Create a bare pod.
    #[instrument(skip(self, pod), fields(workspace_id = %self.workspace_id, pod = %pod.name()))]
    pub async fn create(&self, pod: ClusterObject) -> Result<ClusterObject> {
        let pod = self.label(pod);
        let created = self.client.create(Some(&self.namespace), &pod).await?;
        self.track(created.name(), RuntimeKind::Pod);
        Ok(created)
    }

    /// Create a one-replica deployment running `pod` as its template.
    #[instrument(skip(self, pod), fields(workspace_id = %self.workspace_id, deployment = %pod.name()))]
    pub async fn deploy(&self, pod: ClusterObject) -> Result<ClusterObject> {
        let deployment = self.label(pod).into_deployment();
        let created = self.client.create(Some(&self.namespace), &deployment).await?;
        self.track(created.name(), RuntimeKind::Deployment);
        Ok(created)
    }

    /// The pod called `name`, or the single pod run by the deployment called `name`.
    pub async fn get(&self, name: &str) -> Result<Option<ClusterObject>> {
        let ns = Some(self.namespace.as_str());
        if let Some(pod) = self.client.get(ResourceKind::Pod, ns, name).await? {
            return Ok(Some(pod));
        }
        let Some(deployment) = self.client.get(ResourceKind::Deployment, ns, name).await? else {
            return Ok(None);
        };

        let selector = LabelSelector::from_labels(deployment.match_labels());
        let mut pods = self.client.list(ResourceKind::Pod, ns, &selector).await?;
        match pods.len() {
            0 => Ok(None),
            1 => Ok(pods.pop()),
            _ => Err(WsError::infrastructure(format!(
                "Found multiple pods in Deployment '{}'",
                name
            ))),
        }
    }

    /// Pods labelled with this workspace.
    pub async fn list(&self) -> Result<Vec<ClusterObject>> {
        let selector = LabelSelector::workspace(&self.workspace_id);
        Ok(self
            .client
            .list(ResourceKind::Pod, Some(&self.namespace), &selector)
            .await?)
    }

    /// Resolve once `name` is running, or fail with a startup diagnostic.
    pub fn wait_running(&self, name: &str) -> ReadinessFuture {
        let slot = WatchSlot::new();
        let kind = {
            let mut tracked = self.tracked();
            let entry = tracked.entry(name.to_string()).or_insert(Tracked {
                kind: RuntimeKind::Pod,
                slot: None,
            });
            if let Some(previous) = entry.slot.replace(slot.clone()) {
                previous.release();
            }
            entry.kind
        };
        self.watcher
            .wait_for_phase_in(kind, &self.namespace, name, PodPhase::Running, slot)
    }

    fn release_wait(&self, name: &str) {
        let slot = self.tracked().get_mut(name).and_then(|t| t.slot.take());
        if let Some(slot) = slot {
            slot.release();
        }
    }

    /// Delete `name` and wait for the cluster to confirm it is gone.
    ///
    /// An absent object counts as deleted. Any readiness wait on `name` is
    /// interrupted first, whatever the outcome of the delete.
    #[instrument(skip(self), fields(workspace_id = %self.workspace_id))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let kind = self.kind_of(name);
        self.release_wait(name);
        let result = self.remove(kind, name).await;
        self.tracked().remove(name);
        if let Err(e) = &result {
            warn!("Failed to remove {} '{}': {}", kind, name, e);
        }
        result
    }

    async fn remove(&self, kind: RuntimeKind, name: &str) -> Result<()> {
        let resource = kind.resource();
        let ns = Some(self.namespace.as_str());

        if self.client.get(resource, ns, name).await?.is_none() {
            debug!("{} '{}' is already gone", kind, name);
            return Ok(());
        }

        let mut removal = self
            .client
            .watch(resource, ns, WatchTarget::Name(name.to_string()))
            .await?;

        let deleted = match self
            .client
            .delete(resource, ns, name, PropagationPolicy::Background)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                removal.close();
                return Err(e.into());
            }
        };
        if !deleted {
            removal.close();
            return Ok(());
        }

        let outcome = tokio::time::timeout(self.removal_timeout, removed(&mut removal, kind, name)).await;
        removal.close();
        match outcome {
            Ok(result) => result,
            Err(_) => Err(WsError::infrastructure(format!(
                "{} removal timeout reached for '{}'",
                kind, name
            ))),
        }
    }

    /// Delete every pod and deployment labelled with this workspace.
    ///
    /// Both kinds are attempted; failures are reported together.
    #[instrument(skip(self), fields(workspace_id = %self.workspace_id))]
    pub async fn delete_all(&self) -> Result<()> {
        let slots: Vec<WatchSlot> = self
            .tracked()
            .drain()
            .filter_map(|(_, tracked)| tracked.slot)
            .collect();
        for slot in slots {
            slot.release();
        }

        let failures = delete_labelled(
            self.client.as_ref(),
            &self.namespace,
            &LabelSelector::workspace(&self.workspace_id),
            &[ResourceKind::Deployment, ResourceKind::Pod],
        )
        .await;
        if failures.is_empty() {
            info!("Removed runtime objects of workspace {}", self.workspace_id);
            Ok(())
        } else {
            Err(WsError::infrastructure(format!(
                "Error(s) occurs while removing workspace runtime objects. {}",
                failures.join(" ")
            )))
        }
    }
}

async fn removed(watch: &mut Watch, kind: RuntimeKind, name: &str) -> Result<()> {
    loop {
        match watch.next().await {
            Some(WatchEvent::Deleted(_)) => return Ok(()),
            Some(WatchEvent::Error(message)) => {
                return Err(WsError::infrastructure(format!(
                    "Error occurred while waiting for {} '{}' removal. {}",
                    kind.label().to_lowercase(),
                    name,
                    message
                )))
            }
            Some(_) => continue,
            None => {
                return Err(WsError::infrastructure(format!(
                    "Watch was closed before removal of {} '{}' was observed",
                    kind.label().to_lowercase(),
                    name
                )))
            }
        }
    }
}

/// Delete every object of `kinds` matching `selector`, attempting all kinds.
/// Returns one message per failed kind.
pub(crate) async fn delete_labelled(
    client: &dyn ClusterClient,
    namespace: &str,
    selector: &LabelSelector,
    kinds: &[ResourceKind],
) -> Vec<String> {
    let mut failures = Vec::new();
    for kind in kinds {
        if let Err(e) = client
            .delete_collection(*kind, namespace, selector, PropagationPolicy::Background)
            .await
        {
            warn!("Failed to delete {} in namespace '{}': {}", kind, namespace, e);
            failures.push(e.to_string());
        }
    }
    failures
}
