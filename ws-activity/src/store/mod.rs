//! Activity record storage.
//!
//! Both backends give the same guarantees: every mutation of a given
//! workspace id is applied atomically with respect to the others, and a
//! record is created on demand only by `set_expiration_time`,
//! `set_created_time` and `set_status_change_time`.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::{Page, WorkspaceActivity, WorkspaceStatus};
use async_trait::async_trait;
use ws_core::Result;

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Set the expiration, creating the record if needed.
    async fn set_expiration_time(&self, workspace_id: &str, expiration: i64) -> Result<()>;

    /// Clear the expiration. A missing record is not an error.
    async fn remove_expiration(&self, workspace_id: &str) -> Result<()>;

    /// Ids whose expiration is set and earlier than `now`.
    async fn find_expired_idle(&self, now: i64) -> Result<Vec<String>>;

    /// Ids that are RUNNING and have been for longer than `run_timeout` ms.
    async fn find_expired_run_timeout(&self, now: i64, run_timeout: i64) -> Result<Vec<String>>;

    /// Set the created time. A record without a status becomes STOPPED as of `created`.
    async fn set_created_time(&self, workspace_id: &str, created: i64) -> Result<()>;

    /// Record a transition into `status` at `time`, creating the record if needed.
    async fn set_status_change_time(
        &self,
        workspace_id: &str,
        status: WorkspaceStatus,
        time: i64,
    ) -> Result<()>;

    /// Ids in `status` whose transition into it happened at or before `timestamp`.
    async fn find_in_status_since(
        &self,
        timestamp: i64,
        status: WorkspaceStatus,
        max_items: usize,
        skip: usize,
    ) -> Result<Page<String>>;

    async fn count_in_status(&self, status: WorkspaceStatus, timestamp: i64) -> Result<usize>;

    /// Insert a new record; [`ws_core::WsError::Conflict`] if one exists.
    async fn create_activity(&self, activity: WorkspaceActivity) -> Result<()>;

    async fn get_all(&self, max_items: usize, skip: usize) -> Result<Page<WorkspaceActivity>>;

    async fn remove_activity(&self, workspace_id: &str) -> Result<()>;

    async fn find_activity(&self, workspace_id: &str) -> Result<Option<WorkspaceActivity>>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share; each backend runs these against itself.

    use super::*;
    use ws_core::WsError;

    pub async fn expiration_upsert_and_idle_query(store: &dyn ActivityStore) {
        store.set_expiration_time("ws1", 1_000).await.unwrap();
        store.set_expiration_time("ws2", 5_000).await.unwrap();
        store.set_expiration_time("ws1", 2_000).await.unwrap();

        let mut expired = store.find_expired_idle(3_000).await.unwrap();
        expired.sort();
        assert_eq!(expired, vec!["ws1".to_string()]);
        assert!(store.find_expired_idle(2_000).await.unwrap().is_empty());

        store.remove_expiration("ws1").await.unwrap();
        assert!(store.find_expired_idle(10_000).await.unwrap() == vec!["ws2".to_string()]);

        // no-op on unknown ids
        store.remove_expiration("unknown").await.unwrap();
        assert!(store.find_activity("unknown").await.unwrap().is_none());
    }

    pub async fn run_timeout_ignores_expiration(store: &dyn ActivityStore) {
        let now = 100_000;
        let run_timeout = 10_000;
        store
            .set_status_change_time("long", WorkspaceStatus::Running, now - run_timeout - 1)
            .await
            .unwrap();
        store
            .set_status_change_time("fresh", WorkspaceStatus::Running, now - 10)
            .await
            .unwrap();
        store
            .set_status_change_time("stopped", WorkspaceStatus::Running, 0)
            .await
            .unwrap();
        store
            .set_status_change_time("stopped", WorkspaceStatus::Stopped, 1)
            .await
            .unwrap();

        let long = store.find_activity("long").await.unwrap().unwrap();
        assert_eq!(long.expiration, None);
        assert_eq!(
            store.find_expired_run_timeout(now, run_timeout).await.unwrap(),
            vec!["long".to_string()]
        );
    }

    pub async fn created_time_initialises_stopped(store: &dyn ActivityStore) {
        store.set_created_time("new", 1_000).await.unwrap();
        let created = store.find_activity("new").await.unwrap().unwrap();
        assert_eq!(created.created, Some(1_000));
        assert_eq!(created.status, Some(WorkspaceStatus::Stopped));
        assert_eq!(created.last_stopped, Some(1_000));

        store
            .set_status_change_time("running", WorkspaceStatus::Running, 500)
            .await
            .unwrap();
        store.set_created_time("running", 100).await.unwrap();
        let running = store.find_activity("running").await.unwrap().unwrap();
        assert_eq!(running.created, Some(100));
        assert_eq!(running.status, Some(WorkspaceStatus::Running));
        assert_eq!(running.last_stopped, None);
    }

    pub async fn status_change_routes_to_column(store: &dyn ActivityStore) {
        store
            .set_status_change_time("ws1", WorkspaceStatus::Starting, 10)
            .await
            .unwrap();
        store
            .set_status_change_time("ws1", WorkspaceStatus::Running, 20)
            .await
            .unwrap();
        store
            .set_status_change_time("ws1", WorkspaceStatus::Stopping, 30)
            .await
            .unwrap();

        let activity = store.find_activity("ws1").await.unwrap().unwrap();
        assert_eq!(activity.last_starting, Some(10));
        assert_eq!(activity.last_running, Some(20));
        assert_eq!(activity.last_stopping, Some(30));
        assert_eq!(activity.last_stopped, None);
        assert_eq!(activity.status, Some(WorkspaceStatus::Stopping));
    }

    pub async fn status_queries_and_paging(store: &dyn ActivityStore) {
        for (id, time) in [("a", 10), ("b", 20), ("c", 30), ("d", 40)] {
            store
                .set_status_change_time(id, WorkspaceStatus::Running, time)
                .await
                .unwrap();
        }
        store
            .set_status_change_time("e", WorkspaceStatus::Stopped, 5)
            .await
            .unwrap();

        assert_eq!(store.count_in_status(WorkspaceStatus::Running, 30).await.unwrap(), 3);
        assert_eq!(store.count_in_status(WorkspaceStatus::Stopped, 30).await.unwrap(), 1);

        let first = store
            .find_in_status_since(30, WorkspaceStatus::Running, 2, 0)
            .await
            .unwrap();
        assert_eq!(first.items, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(first.total, 3);
        assert!(first.has_next());

        let second = store
            .find_in_status_since(30, WorkspaceStatus::Running, 2, first.next_skip())
            .await
            .unwrap();
        assert_eq!(second.items, vec!["c".to_string()]);
        assert!(!second.has_next());

        let all = store.get_all(10, 0).await.unwrap();
        assert_eq!(all.total, 5);
        assert_eq!(all.items.len(), 5);
    }

    pub async fn create_conflicts_and_remove(store: &dyn ActivityStore) {
        let activity = WorkspaceActivity {
            workspace_id: "ws1".into(),
            created: Some(1),
            last_running: Some(2),
            expiration: Some(3),
            status: Some(WorkspaceStatus::Running),
            ..Default::default()
        };
        store.create_activity(activity.clone()).await.unwrap();
        assert_eq!(store.find_activity("ws1").await.unwrap(), Some(activity.clone()));

        let err = store.create_activity(activity).await.unwrap_err();
        assert!(matches!(err, WsError::Conflict(_)));

        store.remove_activity("ws1").await.unwrap();
        assert!(store.find_activity("ws1").await.unwrap().is_none());
        store.remove_activity("ws1").await.unwrap();
    }
}
