//! Periodic expiry and repair of activity records.
//!
//! Two independent passes, both driven by an external scheduler:
//!
//! - [`ActivityReconciler::expire`] stops workspaces whose idle expiration or
//!   run timeout has passed.
//! - [`ActivityReconciler::cleanup`] repairs records of running workspaces
//!   and then aligns every stored status with the live one.
//!
//! Both passes handle errors per workspace; one broken record never halts a
//! sweep.

use crate::clock::Clock;
use crate::model::{WorkspaceActivity, WorkspaceStatus};
use crate::policy::ExpirationPolicy;
use crate::store::ActivityStore;
use crate::tracker::ActivityTracker;
use crate::workspace::{
    WorkspaceManager, WorkspaceRuntimes, ACTIVITY_CHECKER, STOPPED_BY_ATTRIBUTE, STOP_REASON,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use ws_core::{Result, WsError};

pub const IDLE_TIMEOUT_EXCEEDED: &str = "Workspace idle timeout exceeded";
pub const RUN_TIMEOUT_EXCEEDED: &str = "Workspace run timeout exceeded";

/// Default time a running workspace may go without an expiration before the
/// reconciler sets one.
pub const DEFAULT_EXPIRATION_GRACE_MS: i64 = 1_000;

/// Page size used when walking every stored record.
const RECONCILE_PAGE_SIZE: usize = 200;

const STALE_ACTIVITY_MS: i64 = 5 * 60 * 1000;

pub struct ActivityReconciler {
    store: Arc<dyn ActivityStore>,
    manager: Arc<dyn WorkspaceManager>,
    runtimes: Arc<dyn WorkspaceRuntimes>,
    tracker: Arc<ActivityTracker>,
    clock: Arc<dyn Clock>,
    expiration_grace_ms: i64,
}

impl ActivityReconciler {
    pub fn new(
        tracker: Arc<ActivityTracker>,
        manager: Arc<dyn WorkspaceManager>,
        runtimes: Arc<dyn WorkspaceRuntimes>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: tracker.store().clone(),
            manager,
            runtimes,
            tracker,
            clock,
            expiration_grace_ms: DEFAULT_EXPIRATION_GRACE_MS,
        }
    }

    pub fn with_expiration_grace(mut self, grace_ms: i64) -> Self {
        self.expiration_grace_ms = grace_ms;
        self
    }

    fn policy(&self) -> ExpirationPolicy {
        self.tracker.policy()
    }

    /// Stop every workspace past its idle expiration or run timeout.
    pub async fn expire(&self) {
        if let Err(e) = self.stop_all_expired().await {
            error!("Failed to list all expired to perform stop. Cause: {}", e);
        }
    }

    async fn stop_all_expired(&self) -> Result<()> {
        let idle = self.store.find_expired_idle(self.clock.now_millis()).await?;
        for workspace_id in idle {
            self.stop_expired_quietly(&workspace_id, IDLE_TIMEOUT_EXCEEDED).await;
        }

        let policy = self.policy();
        if policy.run_enabled() {
            let overdue = self
                .store
                .find_expired_run_timeout(self.clock.now_millis(), policy.run_timeout_ms())
                .await?;
            for workspace_id in overdue {
                info!("{} for workspace {}", RUN_TIMEOUT_EXCEEDED, workspace_id);
                self.stop_expired_quietly(&workspace_id, RUN_TIMEOUT_EXCEEDED).await;
            }
        }
        Ok(())
    }

    async fn stop_expired_quietly(&self, workspace_id: &str, reason: &str) {
        match self.stop_expired(workspace_id, reason).await {
            Ok(()) => info!(workspace_id, reason, "Stopped expired workspace"),
            // already gone
            Err(WsError::NotFound(_)) => {}
            Err(e @ WsError::Conflict(_)) => warn!(workspace_id, "{}", e),
            Err(e) => error!(workspace_id, "{}", e),
        }

        // Cleared even when the stop failed, so a broken workspace is not
        // stopped again on every tick.
        if let Err(e) = self.store.remove_expiration(workspace_id).await {
            error!(workspace_id, "Failed to remove expiration: {}", e);
        }
    }

    async fn stop_expired(&self, workspace_id: &str, reason: &str) -> Result<()> {
        let mut workspace = self.manager.get_workspace(workspace_id).await?;
        workspace
            .attributes
            .insert(STOPPED_BY_ATTRIBUTE.to_string(), ACTIVITY_CHECKER.to_string());
        self.manager.update_workspace(workspace).await?;

        let options = BTreeMap::from([(STOP_REASON.to_string(), reason.to_string())]);
        self.manager.stop_workspace(workspace_id, options).await
    }

    /// Repair records of running workspaces, then reconcile stored statuses
    /// with the live ones.
    pub async fn cleanup(&self) {
        self.check_activity_records_validity().await;
        self.reconcile_activity_statuses().await;
    }

    async fn check_activity_records_validity(&self) {
        let running = match self.runtimes.running().await {
            Ok(running) => running,
            Err(e) => {
                error!("Failed to list running workspaces. Cause: {}", e);
                return;
            }
        };

        for workspace_id in running {
            if let Err(e) = self.check_activity_record_validity(&workspace_id).await {
                error!(
                    "Failed to check activity record for workspace {}. Cause: {}",
                    workspace_id, e
                );
            }
        }
    }

    async fn check_activity_record_validity(&self, workspace_id: &str) -> Result<()> {
        let Some(mut activity) = self.store.find_activity(workspace_id).await? else {
            return self.create_missing_activity_record(workspace_id).await;
        };

        self.rectify_created_time(&mut activity).await?;

        let now = self.clock.now_millis();
        // Taken before last_running is rectified so a newly set value does
        // not count as prior activity.
        let latest = activity.latest_time();
        let no_last_running = self.rectify_last_running_time(&mut activity, now, latest).await?;
        self.rectify_expiration_time(&activity, now, no_last_running, latest)
            .await
    }

    async fn create_missing_activity_record(&self, workspace_id: &str) -> Result<()> {
        warn!(
            "Found a running workspace '{}' without any activity record. This shouldn't really happen \
             but is being rectified by adding a new activity record for it.",
            workspace_id
        );

        let workspace = match self.manager.get_workspace(workspace_id).await {
            Ok(workspace) => workspace,
            Err(WsError::NotFound(_)) => {
                error!(
                    "Detected a running workspace '{}' but could not find its record.",
                    workspace_id
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now_millis();
        let created = workspace.created_time().unwrap_or_else(|| {
            error!(
                "Failed to read the created time of the workspace '{}' from its attributes. \
                 Using the current time.",
                workspace_id
            );
            now
        });

        let activity = WorkspaceActivity {
            workspace_id: workspace_id.to_string(),
            created: Some(created),
            last_running: Some(now),
            expiration: self.policy().expiration_after(now),
            status: Some(WorkspaceStatus::Running),
            ..Default::default()
        };

        match self.store.create_activity(activity).await {
            Ok(()) => Ok(()),
            Err(WsError::Conflict(_)) => {
                debug!(
                    "Activity record created while we were trying to rectify its absence for a \
                     running workspace '{}'.",
                    workspace_id
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn rectify_created_time(&self, activity: &mut WorkspaceActivity) -> Result<()> {
        if activity.created.is_some() {
            return Ok(());
        }
        let workspace_id = activity.workspace_id.clone();

        let workspace = match self.manager.get_workspace(&workspace_id).await {
            Ok(workspace) => workspace,
            Err(WsError::NotFound(_)) => {
                error!(
                    "Detected a running workspace '{}' but could not find its record.",
                    workspace_id
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let created = match (workspace.created_time(), activity.oldest_time()) {
            (Some(created), _) => {
                warn!(
                    "Workspace '{}' doesn't have any information about when it was created or last \
                     seen starting. Setting the created time to {}.",
                    workspace_id, created
                );
                created
            }
            (None, Some(oldest)) => {
                error!(
                    "Failed to read the created time of the workspace '{}' from its attributes. \
                     Using the oldest activity time found on it ({}) as its created time.",
                    workspace_id, oldest
                );
                oldest
            }
            (None, None) => {
                let now = self.clock.now_millis();
                error!(
                    "Failed to read the created time of the workspace '{}' from its attributes. \
                     Using the current time ({}) for it because no other activity was ever \
                     recorded on the workspace.",
                    workspace_id, now
                );
                now
            }
        };

        self.store.set_created_time(&workspace_id, created).await?;
        activity.created = Some(created);
        Ok(())
    }

    /// Returns true when the record had no last running time at all.
    async fn rectify_last_running_time(
        &self,
        activity: &mut WorkspaceActivity,
        now: i64,
        latest: Option<i64>,
    ) -> Result<bool> {
        let workspace_id = activity.workspace_id.clone();

        match activity.last_running {
            None => {
                self.store
                    .set_status_change_time(&workspace_id, WorkspaceStatus::Running, now)
                    .await?;
                activity.last_running = Some(now);

                match latest {
                    None => warn!(
                        "Workspace '{}' had no information about the last activity on it yet was \
                         found running. The last seen running time of the workspace has been reset \
                         to {}.",
                        workspace_id, now
                    ),
                    Some(latest) if latest < now - STALE_ACTIVITY_MS => warn!(
                        "Workspace '{}' had no information about the last time it has started yet \
                         was found running. The last activity recorded on it was more than 5 \
                         minutes ago, at timestamp {}. The last seen running time of the workspace \
                         has been reset to {}.",
                        workspace_id, latest, now
                    ),
                    Some(_) => debug!(
                        "Workspace '{}' had no information about the last time it has started yet \
                         was found running. The activity record (with the rectified last running \
                         time) looks like this: {:?}",
                        workspace_id, activity
                    ),
                }
                Ok(true)
            }
            Some(last_running) => {
                if let Some(latest) = latest.filter(|latest| *latest > last_running) {
                    warn!(
                        "Workspace '{}' has been found running yet there is an activity on it newer \
                         than the last running time. Resetting the last running time to the newest \
                         activity time. The activity record is this: {:?}",
                        workspace_id, activity
                    );
                    self.store
                        .set_status_change_time(&workspace_id, WorkspaceStatus::Running, latest)
                        .await?;
                    activity.last_running = Some(latest);
                }
                Ok(false)
            }
        }
    }

    async fn rectify_expiration_time(
        &self,
        activity: &WorkspaceActivity,
        now: i64,
        no_last_running: bool,
        latest: Option<i64>,
    ) -> Result<()> {
        if activity.expiration.is_some() || !self.policy().idle_enabled() {
            return Ok(());
        }
        let workspace_id = activity.workspace_id.as_str();
        let last_time = activity.last_running.unwrap_or(now);

        if latest.is_none() {
            self.tracker.update(workspace_id, last_time).await?;
            warn!(
                "Found no expiration time on workspace '{}'. No prior activity was found on the \
                 workspace. To restore the normal function, the expiration time has been set \
                 based on {}.",
                workspace_id, last_time
            );
        } else if no_last_running {
            self.tracker.update(workspace_id, last_time).await?;
            warn!(
                "Found no expiration time on workspace '{}' and no record of the last time it \
                 started. The expiration has been set based on {}.",
                workspace_id, last_time
            );
        } else {
            let since_running = now - last_time;
            if since_running > self.expiration_grace_ms {
                self.tracker.update(workspace_id, last_time).await?;
                warn!(
                    "Found no expiration time on workspace '{}'. This was detected {}ms after the \
                     workspace has been recorded running which is suspicious. To restore the normal \
                     function, the expiration time has been set based on {}.",
                    workspace_id, since_running, last_time
                );
            } else {
                debug!(
                    "Found no expiration time on workspace '{}'. This was detected {}ms after the \
                     workspace has been recorded running, most probably while it was entering the \
                     running state. Leaving that for the next iteration.",
                    workspace_id, since_running
                );
            }
        }
        Ok(())
    }

    async fn reconcile_activity_statuses(&self) {
        let mut skip = 0;
        loop {
            let page = match self.store.get_all(RECONCILE_PAGE_SIZE, skip).await {
                Ok(page) => page,
                Err(e) => {
                    error!("Failed to load all activities to reconcile them. Cause: {}", e);
                    return;
                }
            };

            for activity in &page.items {
                if let Err(e) = self.reconcile_one(activity).await {
                    error!(
                        "Failed to reconcile activity for workspace {}. Cause: {}",
                        activity.workspace_id, e
                    );
                }
            }

            if !page.has_next() || page.items.is_empty() {
                return;
            }
            skip = page.next_skip();
        }
    }

    async fn reconcile_one(&self, activity: &WorkspaceActivity) -> Result<()> {
        let status = self.runtimes.status_of(&activity.workspace_id).await?;
        if activity.status != Some(status) {
            warn!(
                "Activity record for workspace {} was registering {:?} status while the workspace \
                 was {} in reality. Rectifying the activity record to reflect the true state of \
                 the workspace.",
                activity.workspace_id, activity.status, status
            );
            self.store
                .set_status_change_time(&activity.workspace_id, status, self.clock.now_millis())
                .await?;
        }
        Ok(())
    }
}
