pub mod cluster_workspaces;
pub mod config;
pub mod error;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod tracing_init;

pub use cluster_workspaces::ClusterWorkspaces;
pub use config::{Config, StoreBackend};
pub use error::{ApiError, ApiResult};
pub use routes::create_app;
pub use scheduler::{spawn_reconciler_tasks, Schedule};
pub use state::AppState;
