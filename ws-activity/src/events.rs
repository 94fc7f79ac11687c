//! Workspace lifecycle events and their delivery.

use crate::model::WorkspaceStatus;
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::{debug, error};
use ws_core::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceEvent {
    Created(Workspace),
    StatusChanged {
        workspace_id: String,
        status: WorkspaceStatus,
        previous: Option<WorkspaceStatus>,
    },
    /// The workspace is about to be permanently removed.
    Removed { workspace_id: String },
}

impl WorkspaceEvent {
    pub fn status_changed(
        workspace_id: impl Into<String>,
        status: WorkspaceStatus,
        previous: Option<WorkspaceStatus>,
    ) -> Self {
        WorkspaceEvent::StatusChanged {
            workspace_id: workspace_id.into(),
            status,
            previous,
        }
    }

    pub fn workspace_id(&self) -> &str {
        match self {
            WorkspaceEvent::Created(workspace) => &workspace.id,
            WorkspaceEvent::StatusChanged { workspace_id, .. } => workspace_id,
            WorkspaceEvent::Removed { workspace_id } => workspace_id,
        }
    }
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &WorkspaceEvent) -> Result<()>;
}

/// Delivers every event to every subscriber in subscription order.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Returns the number of subscribers that failed to handle the event.
    pub async fn publish(&self, event: WorkspaceEvent) -> usize {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let mut failures = 0;
        for subscriber in subscribers {
            if let Err(e) = subscriber.on_event(&event).await {
                failures += 1;
                error!(
                    subscriber = subscriber.name(),
                    workspace_id = %event.workspace_id(),
                    "Subscriber failed to handle workspace event: {}",
                    e
                );
            }
        }
        debug!(workspace_id = %event.workspace_id(), failures, "Published workspace event");
        failures
    }
}
