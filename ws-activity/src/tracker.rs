//! Turns lifecycle events and activity pings into activity store updates.

use crate::clock::Clock;
use crate::events::{EventSubscriber, WorkspaceEvent};
use crate::model::WorkspaceStatus;
use crate::policy::ExpirationPolicy;
use crate::store::ActivityStore;
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};
use ws_core::Result;

pub struct ActivityTracker {
    store: Arc<dyn ActivityStore>,
    policy: ExpirationPolicy,
    clock: Arc<dyn Clock>,
}

impl ActivityTracker {
    pub fn new(store: Arc<dyn ActivityStore>, policy: ExpirationPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> ExpirationPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn ActivityStore> {
        &self.store
    }

    /// Record activity on a workspace at `activity_time`, pushing its
    /// expiration out by the idle timeout. A no-op when idle expiry is off.
    pub async fn update(&self, workspace_id: &str, activity_time: i64) -> Result<()> {
        if let Some(expiration) = self.policy.expiration_after(activity_time) {
            self.store.set_expiration_time(workspace_id, expiration).await?;
            debug!(workspace_id, expiration, "Updated workspace expiration");
        }
        Ok(())
    }

    async fn on_status_changed(&self, workspace_id: &str, status: WorkspaceStatus) -> Result<()> {
        let now = self.clock.now_millis();
        self.store.set_status_change_time(workspace_id, status, now).await?;
        match status {
            WorkspaceStatus::Running => self.update(workspace_id, now).await,
            WorkspaceStatus::Stopped => self.store.remove_expiration(workspace_id).await,
            WorkspaceStatus::Starting | WorkspaceStatus::Stopping => Ok(()),
        }
    }

    async fn on_created(&self, workspace: &Workspace) -> Result<()> {
        match workspace.created_time() {
            Some(created) => self.store.set_created_time(&workspace.id, created).await,
            None => {
                warn!(
                    workspace_id = %workspace.id,
                    "Workspace was created without a readable created attribute"
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EventSubscriber for ActivityTracker {
    fn name(&self) -> &str {
        "activity-tracker"
    }

    async fn on_event(&self, event: &WorkspaceEvent) -> Result<()> {
        let result = match event {
            WorkspaceEvent::Created(workspace) => self.on_created(workspace).await,
            WorkspaceEvent::StatusChanged {
                workspace_id,
                status,
                ..
            } => self.on_status_changed(workspace_id, *status).await,
            WorkspaceEvent::Removed { workspace_id } => {
                self.store.remove_activity(workspace_id).await
            }
        };

        // Recording activity never fails the transition that triggered it.
        if let Err(e) = result {
            error!(
                workspace_id = %event.workspace_id(),
                "Failed to record workspace activity: {}",
                e
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::workspace::CREATED_ATTRIBUTE;

    const IDLE: i64 = 600_000;

    fn tracker(idle: i64) -> (ActivityTracker, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(50_000));
        let tracker = ActivityTracker::new(store.clone(), ExpirationPolicy::new(idle, 0), clock.clone());
        (tracker, store, clock)
    }

    #[tokio::test]
    async fn test_update_moves_expiration_window() {
        let (tracker, store, _) = tracker(IDLE);
        let activity = 1_000_000;

        tracker.update("ws1", activity).await.unwrap();

        let expired = store.find_expired_idle(activity + IDLE + 1).await.unwrap();
        assert_eq!(expired, vec!["ws1".to_string()]);
        assert!(store.find_expired_idle(activity + IDLE - 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_without_idle_timeout_is_noop() {
        let (tracker, store, _) = tracker(0);
        tracker.update("ws1", 1_000).await.unwrap();
        assert!(store.find_activity("ws1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_running_then_stopped_clears_expiration() {
        let (tracker, store, clock) = tracker(IDLE);

        tracker
            .on_event(&WorkspaceEvent::status_changed("ws1", WorkspaceStatus::Running, None))
            .await
            .unwrap();
        let running = store.find_activity("ws1").await.unwrap().unwrap();
        assert_eq!(running.last_running, Some(50_000));
        assert_eq!(running.expiration, Some(50_000 + IDLE));

        clock.advance(1_000);
        tracker
            .on_event(&WorkspaceEvent::status_changed(
                "ws1",
                WorkspaceStatus::Stopped,
                Some(WorkspaceStatus::Stopping),
            ))
            .await
            .unwrap();
        let stopped = store.find_activity("ws1").await.unwrap().unwrap();
        assert_eq!(stopped.status, Some(WorkspaceStatus::Stopped));
        assert_eq!(stopped.last_stopped, Some(51_000));
        assert_eq!(stopped.expiration, None);
    }

    #[tokio::test]
    async fn test_created_and_removed_events() {
        let (tracker, store, _) = tracker(IDLE);
        let workspace = Workspace::new("ws1").with_attribute(CREATED_ATTRIBUTE, "1234");

        tracker.on_event(&WorkspaceEvent::Created(workspace)).await.unwrap();
        let created = store.find_activity("ws1").await.unwrap().unwrap();
        assert_eq!(created.created, Some(1234));
        assert_eq!(created.status, Some(WorkspaceStatus::Stopped));

        tracker
            .on_event(&WorkspaceEvent::Removed {
                workspace_id: "ws1".into(),
            })
            .await
            .unwrap();
        assert!(store.find_activity("ws1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_created_without_attribute_is_logged_and_skipped() {
        let (tracker, store, _) = tracker(IDLE);
        tracker
            .on_event(&WorkspaceEvent::Created(Workspace::new("ws1")))
            .await
            .unwrap();
        assert!(store.find_activity("ws1").await.unwrap().is_none());
    }
}
