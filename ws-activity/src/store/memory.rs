use super::ActivityStore;
use crate::model::{Page, WorkspaceActivity, WorkspaceStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use ws_core::{Result, WsError};

/// Process-local store. Every operation runs under one lock, so updates to
/// the same id never interleave.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, WorkspaceActivity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, WorkspaceActivity>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn sorted_ids<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&WorkspaceActivity) -> bool,
    {
        let mut ids: Vec<String> = self
            .records()
            .values()
            .filter(|activity| predicate(activity))
            .map(|activity| activity.workspace_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

fn in_status_since(activity: &WorkspaceActivity, status: WorkspaceStatus, timestamp: i64) -> bool {
    activity.status == Some(status)
        && activity
            .status_time(status)
            .is_some_and(|time| time <= timestamp)
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn set_expiration_time(&self, workspace_id: &str, expiration: i64) -> Result<()> {
        self.records()
            .entry(workspace_id.to_string())
            .or_insert_with(|| WorkspaceActivity::new(workspace_id))
            .expiration = Some(expiration);
        Ok(())
    }

    async fn remove_expiration(&self, workspace_id: &str) -> Result<()> {
        if let Some(activity) = self.records().get_mut(workspace_id) {
            activity.expiration = None;
        }
        Ok(())
    }

    async fn find_expired_idle(&self, now: i64) -> Result<Vec<String>> {
        Ok(self.sorted_ids(|a| a.expiration.is_some_and(|expiration| expiration < now)))
    }

    async fn find_expired_run_timeout(&self, now: i64, run_timeout: i64) -> Result<Vec<String>> {
        Ok(self.sorted_ids(|a| {
            a.status == Some(WorkspaceStatus::Running)
                && a.last_running.is_some_and(|running| now - running > run_timeout)
        }))
    }

    async fn set_created_time(&self, workspace_id: &str, created: i64) -> Result<()> {
        let mut records = self.records();
        let activity = records
            .entry(workspace_id.to_string())
            .or_insert_with(|| WorkspaceActivity::new(workspace_id));
        activity.created = Some(created);
        if activity.status.is_none() {
            activity.set_status_time(WorkspaceStatus::Stopped, created);
        }
        Ok(())
    }

    async fn set_status_change_time(
        &self,
        workspace_id: &str,
        status: WorkspaceStatus,
        time: i64,
    ) -> Result<()> {
        self.records()
            .entry(workspace_id.to_string())
            .or_insert_with(|| WorkspaceActivity::new(workspace_id))
            .set_status_time(status, time);
        Ok(())
    }

    async fn find_in_status_since(
        &self,
        timestamp: i64,
        status: WorkspaceStatus,
        max_items: usize,
        skip: usize,
    ) -> Result<Page<String>> {
        let ids = self.sorted_ids(|a| in_status_since(a, status, timestamp));
        let total = ids.len();
        let items = ids.into_iter().skip(skip).take(max_items).collect();
        Ok(Page::new(items, max_items, skip, total))
    }

    async fn count_in_status(&self, status: WorkspaceStatus, timestamp: i64) -> Result<usize> {
        Ok(self
            .records()
            .values()
            .filter(|a| in_status_since(a, status, timestamp))
            .count())
    }

    async fn create_activity(&self, activity: WorkspaceActivity) -> Result<()> {
        let mut records = self.records();
        if records.contains_key(&activity.workspace_id) {
            return Err(WsError::Conflict(format!(
                "Activity record for workspace '{}' already exists",
                activity.workspace_id
            )));
        }
        records.insert(activity.workspace_id.clone(), activity);
        Ok(())
    }

    async fn get_all(&self, max_items: usize, skip: usize) -> Result<Page<WorkspaceActivity>> {
        let records = self.records();
        let mut all: Vec<&WorkspaceActivity> = records.values().collect();
        all.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));
        let items = all.iter().skip(skip).take(max_items).map(|a| (*a).clone()).collect();
        Ok(Page::new(items, max_items, skip, all.len()))
    }

    async fn remove_activity(&self, workspace_id: &str) -> Result<()> {
        self.records().remove(workspace_id);
        Ok(())
    }

    async fn find_activity(&self, workspace_id: &str) -> Result<Option<WorkspaceActivity>> {
        Ok(self.records().get(workspace_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[tokio::test]
    async fn test_expiration_upsert_and_idle_query() {
        contract::expiration_upsert_and_idle_query(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_run_timeout_ignores_expiration() {
        contract::run_timeout_ignores_expiration(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_created_time_initialises_stopped() {
        contract::created_time_initialises_stopped(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_status_change_routes_to_column() {
        contract::status_change_routes_to_column(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_status_queries_and_paging() {
        contract::status_queries_and_paging(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_create_conflicts_and_remove() {
        contract::create_conflicts_and_remove(&MemoryStore::new()).await;
    }
}
