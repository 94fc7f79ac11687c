use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use ws_activity::db::{backup_database, create_pool, run_migrations};
use ws_activity::{
    ActivityReconciler, ActivityStore, ActivityTracker, Clock, EventBus, MemoryStore, SqliteStore,
    SystemClock,
};
use ws_api::{create_app, spawn_reconciler_tasks, AppState, ClusterWorkspaces, Config, Schedule, StoreBackend};
use ws_cluster::{KubectlClient, NamespaceResolver};

#[tokio::main]
async fn main() -> Result<()> {
    ws_api::tracing_init::init()?;

    info!("Starting ws-api service...");

    // Load configuration
    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, store={:?}, idle_timeout_ms={}, run_timeout_ms={}",
        config.bind_addr, config.store, config.idle_timeout_ms, config.run_timeout_ms
    );

    let store: Arc<dyn ActivityStore> = match config.store {
        StoreBackend::Memory => {
            warn!("Using the in-memory activity store; records are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Sqlite => {
            let db_path = &config.db_path;
            info!("Database path: {}", db_path.display());

            // Backup before migrations
            if let Some(backup_path) = backup_database(db_path)? {
                info!("Database backed up to: {}", backup_path.display());
            }

            let pool = create_pool(db_path).await?;
            info!("Running database migrations...");
            run_migrations(&pool).await?;
            info!("Migrations complete");
            Arc::new(SqliteStore::new(pool))
        }
    };

    let kubectl = KubectlClient::new(config.kubectl_config());
    if !kubectl.is_available() {
        warn!("'{}' was not found on PATH; cluster calls will fail", config.kubectl);
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events = Arc::new(EventBus::new());
    let tracker = Arc::new(ActivityTracker::new(store, config.policy(), clock.clone()));
    events.subscribe(tracker.clone());

    let workspaces = Arc::new(ClusterWorkspaces::new(
        Arc::new(kubectl),
        NamespaceResolver::new(config.namespace_template.clone()),
        events.clone(),
    ));

    let reconciler = Arc::new(
        ActivityReconciler::new(tracker.clone(), workspaces.clone(), workspaces.clone(), clock.clone())
            .with_expiration_grace(config.expiration_grace_ms),
    );
    spawn_reconciler_tasks(
        reconciler,
        Schedule::from_secs(config.check_initial_delay_secs, config.check_interval_secs),
        Schedule::from_secs(config.cleanup_initial_delay_secs, config.cleanup_interval_secs),
    );
    info!(
        "Reconciler tasks started (expiry every {}s, cleanup every {}s)",
        config.check_interval_secs, config.cleanup_interval_secs
    );

    let app = create_app(AppState::new(tracker, workspaces, clock));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
