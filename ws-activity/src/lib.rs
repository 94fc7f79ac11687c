//! Workspace activity tracking.
//!
//! Records per-workspace lifecycle timestamps, computes idle/run expiration
//! and periodically stops expired workspaces and repairs drifted records.

pub mod clock;
pub mod db;
pub mod events;
pub mod model;
pub mod policy;
pub mod reconciler;
pub mod store;
pub mod tracker;
pub mod workspace;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{EventBus, EventSubscriber, WorkspaceEvent};
pub use model::{Page, WorkspaceActivity, WorkspaceStatus};
pub use policy::ExpirationPolicy;
pub use reconciler::ActivityReconciler;
pub use store::{ActivityStore, MemoryStore, SqliteStore};
pub use tracker::ActivityTracker;
pub use workspace::{Workspace, WorkspaceManager, WorkspaceRuntimes};
