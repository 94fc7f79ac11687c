use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use ws_core::{Result, WsError};

pub(crate) fn db_error(err: sqlx::Error) -> WsError {
    WsError::Database(err.to_string())
}

/// Initialize database connection pool
#[instrument(fields(db_path = %db_path.display()))]
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    SqlitePool::connect_with(options).await.map_err(db_error)
}

/// Run database migrations
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| WsError::Database(format!("Migration failed: {}", e)))?;

    Ok(())
}

/// Backup database before migrations. Returns the backup path, or `None`
/// when there is no database file yet.
pub fn backup_database(db_path: &Path) -> Result<Option<PathBuf>> {
    if !db_path.exists() {
        return Ok(None);
    }

    let timestamp = chrono::Utc::now().timestamp();
    let backup_path = db_path.with_extension(format!("db.backup.{}", timestamp));
    std::fs::copy(db_path, &backup_path)?;
    info!("Backed up activity database to {}", backup_path.display());

    Ok(Some(backup_path))
}
