//! Cluster-side lifecycle plumbing for workspaces.
//!
//! This crate provides the seam to the cluster control plane ([`ClusterClient`])
//! and the provisioning logic layered on top of it:
//!
//! - [`watcher::RuntimeObjectWatcher`] resolves a future when a pod or
//!   deployment reaches a target phase, or fails with a diagnostic.
//! - [`registry::RuntimeObjects`] is the per-workspace facade over pods and
//!   deployments, with race-safe deletes.
//! - [`namespace::NamespaceProvisioner`] makes sure a namespace and its
//!   default service account exist before anything is created in it.

use async_trait::async_trait;

pub mod error;
pub mod kubectl;
pub mod namespace;
pub mod object;
pub mod registry;
pub mod watch;
pub mod watcher;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use error::{ClusterError, ClusterResult};
pub use kubectl::{KubectlClient, KubectlConfig};
pub use namespace::{NamespaceProvisioner, NamespaceResolver, WorkspaceNamespace};
pub use object::{
    ClusterObject, LabelSelector, ObjectMeta, PodPhase, PropagationPolicy, ResourceKind,
    RuntimeKind, WatchTarget, DEPLOYMENT_LABEL, WORKSPACE_ID_LABEL,
};
pub use registry::RuntimeObjects;
pub use watch::{Watch, WatchEvent, WatchHandle, WatchSlot};
pub use watcher::{ReadinessFuture, RuntimeObjectWatcher};

/// Verbs consumed from the cluster control plane.
///
/// `namespace` is `None` for cluster-scoped kinds (and for "all namespaces"
/// in [`ClusterClient::list`]).
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a single object; `Ok(None)` when it does not exist.
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> ClusterResult<Option<ClusterObject>>;

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> ClusterResult<Vec<ClusterObject>>;

    async fn create(
        &self,
        namespace: Option<&str>,
        object: &ClusterObject,
    ) -> ClusterResult<ClusterObject>;

    /// Delete one object. `Ok(false)` when nothing was deleted.
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        propagation: PropagationPolicy,
    ) -> ClusterResult<bool>;

    async fn delete_collection(
        &self,
        kind: ResourceKind,
        namespace: &str,
        selector: &LabelSelector,
        propagation: PropagationPolicy,
    ) -> ClusterResult<()>;

    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        target: WatchTarget,
    ) -> ClusterResult<Watch>;

    async fn logs(&self, kind: RuntimeKind, namespace: &str, name: &str) -> ClusterResult<String>;
}
