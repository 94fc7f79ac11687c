use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ws_core::WsError;

/// Lifecycle status of a workspace as seen by the activity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkspaceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl WorkspaceStatus {
    pub const ALL: [WorkspaceStatus; 4] = [
        WorkspaceStatus::Starting,
        WorkspaceStatus::Running,
        WorkspaceStatus::Stopping,
        WorkspaceStatus::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceStatus::Starting => "STARTING",
            WorkspaceStatus::Running => "RUNNING",
            WorkspaceStatus::Stopping => "STOPPING",
            WorkspaceStatus::Stopped => "STOPPED",
        }
    }

    /// Column holding the time of the last transition into this status.
    pub(crate) fn column(&self) -> &'static str {
        match self {
            WorkspaceStatus::Starting => "last_starting",
            WorkspaceStatus::Running => "last_running",
            WorkspaceStatus::Stopping => "last_stopping",
            WorkspaceStatus::Stopped => "last_stopped",
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkspaceStatus {
    type Err = WsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkspaceStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| WsError::Internal(format!("Unknown workspace status '{}'", s)))
    }
}

/// Lifecycle timestamps of one workspace, in epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceActivity {
    pub workspace_id: String,
    pub created: Option<i64>,
    pub last_starting: Option<i64>,
    pub last_running: Option<i64>,
    pub last_stopping: Option<i64>,
    pub last_stopped: Option<i64>,
    /// Only set while running with an idle timeout configured.
    pub expiration: Option<i64>,
    pub status: Option<WorkspaceStatus>,
}

impl WorkspaceActivity {
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            ..Default::default()
        }
    }

    pub fn status_time(&self, status: WorkspaceStatus) -> Option<i64> {
        match status {
            WorkspaceStatus::Starting => self.last_starting,
            WorkspaceStatus::Running => self.last_running,
            WorkspaceStatus::Stopping => self.last_stopping,
            WorkspaceStatus::Stopped => self.last_stopped,
        }
    }

    /// Record a transition into `status` at `time`.
    pub fn set_status_time(&mut self, status: WorkspaceStatus, time: i64) {
        let slot = match status {
            WorkspaceStatus::Starting => &mut self.last_starting,
            WorkspaceStatus::Running => &mut self.last_running,
            WorkspaceStatus::Stopping => &mut self.last_stopping,
            WorkspaceStatus::Stopped => &mut self.last_stopped,
        };
        *slot = Some(time);
        self.status = Some(status);
    }

    fn timestamps(&self) -> impl Iterator<Item = i64> {
        [
            self.created,
            self.last_starting,
            self.last_running,
            self.last_stopping,
            self.last_stopped,
        ]
        .into_iter()
        .flatten()
    }

    /// Oldest recorded timestamp, `created` included.
    pub fn oldest_time(&self) -> Option<i64> {
        self.timestamps().min()
    }

    /// Newest recorded timestamp, `created` included.
    pub fn latest_time(&self) -> Option<i64> {
        self.timestamps().max()
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub max_items: usize,
    pub skip: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, max_items: usize, skip: usize, total: usize) -> Self {
        Self {
            items,
            max_items,
            skip,
            total,
        }
    }

    pub fn has_next(&self) -> bool {
        self.skip + self.items.len() < self.total
    }

    /// Offset of the next page.
    pub fn next_skip(&self) -> usize {
        self.skip + self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_time_routing() {
        let mut activity = WorkspaceActivity::new("ws1");
        activity.set_status_time(WorkspaceStatus::Stopping, 42);

        assert_eq!(activity.last_stopping, Some(42));
        assert_eq!(activity.status, Some(WorkspaceStatus::Stopping));
        assert_eq!(activity.status_time(WorkspaceStatus::Stopping), Some(42));
        assert_eq!(activity.status_time(WorkspaceStatus::Running), None);
    }

    #[test]
    fn test_oldest_and_latest() {
        let activity = WorkspaceActivity {
            workspace_id: "ws1".into(),
            created: Some(100),
            last_running: Some(300),
            last_stopped: Some(200),
            ..Default::default()
        };
        assert_eq!(activity.oldest_time(), Some(100));
        assert_eq!(activity.latest_time(), Some(300));
        assert_eq!(WorkspaceActivity::new("empty").latest_time(), None);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("running".parse::<WorkspaceStatus>().unwrap(), WorkspaceStatus::Running);
        assert!("paused".parse::<WorkspaceStatus>().is_err());
    }

    #[test]
    fn test_page_cursor() {
        let page = Page::new(vec![1, 2], 2, 0, 3);
        assert!(page.has_next());
        assert_eq!(page.next_skip(), 2);
        assert!(!Page::new(vec![3], 2, 2, 3).has_next());
    }
}
