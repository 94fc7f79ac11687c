use std::sync::Arc;
use ws_activity::{ActivityStore, ActivityTracker, Clock, WorkspaceRuntimes};

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<ActivityTracker>,
    pub runtimes: Arc<dyn WorkspaceRuntimes>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        tracker: Arc<ActivityTracker>,
        runtimes: Arc<dyn WorkspaceRuntimes>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tracker,
            runtimes,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn ActivityStore> {
        self.tracker.store()
    }
}
