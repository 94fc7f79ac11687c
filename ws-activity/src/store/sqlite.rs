use super::ActivityStore;
use crate::db::db_error;
use crate::model::{Page, WorkspaceActivity, WorkspaceStatus};
use async_trait::async_trait;
use sqlx::SqlitePool;
use ws_core::{Result, WsError};

/// Durable store on the `workspace_activity` table.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
struct ActivityRow {
    workspace_id: String,
    created: Option<i64>,
    last_starting: Option<i64>,
    last_running: Option<i64>,
    last_stopping: Option<i64>,
    last_stopped: Option<i64>,
    expiration: Option<i64>,
    status: Option<WorkspaceStatus>,
}

impl From<ActivityRow> for WorkspaceActivity {
    fn from(row: ActivityRow) -> Self {
        Self {
            workspace_id: row.workspace_id,
            created: row.created,
            last_starting: row.last_starting,
            last_running: row.last_running,
            last_stopping: row.last_stopping,
            last_stopped: row.last_stopped,
            expiration: row.expiration,
            status: row.status,
        }
    }
}

fn limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl ActivityStore for SqliteStore {
    async fn set_expiration_time(&self, workspace_id: &str, expiration: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workspace_activity (workspace_id, expiration)
            VALUES (?, ?)
            ON CONFLICT(workspace_id) DO UPDATE SET expiration = excluded.expiration
            "#,
        )
        .bind(workspace_id)
        .bind(expiration)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn remove_expiration(&self, workspace_id: &str) -> Result<()> {
        sqlx::query("UPDATE workspace_activity SET expiration = NULL WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn find_expired_idle(&self, now: i64) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT workspace_id FROM workspace_activity
            WHERE expiration IS NOT NULL AND expiration < ?
            ORDER BY workspace_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn find_expired_run_timeout(&self, now: i64, run_timeout: i64) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT workspace_id FROM workspace_activity
            WHERE status = ? AND last_running IS NOT NULL AND last_running < ?
            ORDER BY workspace_id
            "#,
        )
        .bind(WorkspaceStatus::Running)
        .bind(now.saturating_sub(run_timeout))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn set_created_time(&self, workspace_id: &str, created: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workspace_activity (workspace_id, created, status, last_stopped)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(workspace_id) DO UPDATE SET
                created = excluded.created,
                last_stopped = CASE
                    WHEN workspace_activity.status IS NULL THEN excluded.last_stopped
                    ELSE workspace_activity.last_stopped
                END,
                status = COALESCE(workspace_activity.status, excluded.status)
            "#,
        )
        .bind(workspace_id)
        .bind(created)
        .bind(WorkspaceStatus::Stopped)
        .bind(created)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn set_status_change_time(
        &self,
        workspace_id: &str,
        status: WorkspaceStatus,
        time: i64,
    ) -> Result<()> {
        let column = status.column();
        let query = format!(
            r#"
            INSERT INTO workspace_activity (workspace_id, status, {column})
            VALUES (?, ?, ?)
            ON CONFLICT(workspace_id) DO UPDATE SET
                status = excluded.status,
                {column} = excluded.{column}
            "#
        );
        sqlx::query(&query)
            .bind(workspace_id)
            .bind(status)
            .bind(time)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn find_in_status_since(
        &self,
        timestamp: i64,
        status: WorkspaceStatus,
        max_items: usize,
        skip: usize,
    ) -> Result<Page<String>> {
        let column = status.column();
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let items: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT workspace_id FROM workspace_activity WHERE status = ? AND {column} <= ? \
             ORDER BY workspace_id LIMIT ? OFFSET ?"
        ))
        .bind(status)
        .bind(timestamp)
        .bind(limit(max_items))
        .bind(limit(skip))
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM workspace_activity WHERE status = ? AND {column} <= ?"
        ))
        .bind(status)
        .bind(timestamp)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(Page::new(items, max_items, skip, total as usize))
    }

    async fn count_in_status(&self, status: WorkspaceStatus, timestamp: i64) -> Result<usize> {
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM workspace_activity WHERE status = ? AND {} <= ?",
            status.column()
        ))
        .bind(status)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(total as usize)
    }

    async fn create_activity(&self, activity: WorkspaceActivity) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workspace_activity
                (workspace_id, created, last_starting, last_running, last_stopping, last_stopped, expiration, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&activity.workspace_id)
        .bind(activity.created)
        .bind(activity.last_starting)
        .bind(activity.last_running)
        .bind(activity.last_stopping)
        .bind(activity.last_stopped)
        .bind(activity.expiration)
        .bind(activity.status)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(WsError::Conflict(
                format!(
                    "Activity record for workspace '{}' already exists",
                    activity.workspace_id
                ),
            )),
            Err(e) => Err(db_error(e)),
        }
    }

    async fn get_all(&self, max_items: usize, skip: usize) -> Result<Page<WorkspaceActivity>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT * FROM workspace_activity ORDER BY workspace_id LIMIT ? OFFSET ?",
        )
        .bind(limit(max_items))
        .bind(limit(skip))
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workspace_activity")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(Page::new(
            rows.into_iter().map(Into::into).collect(),
            max_items,
            skip,
            total as usize,
        ))
    }

    async fn remove_activity(&self, workspace_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM workspace_activity WHERE workspace_id = ?")
            .bind(workspace_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn find_activity(&self, workspace_id: &str) -> Result<Option<WorkspaceActivity>> {
        let row = sqlx::query_as::<_, ActivityRow>(
            "SELECT * FROM workspace_activity WHERE workspace_id = ?",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use crate::test_utils::create_test_db;

    async fn store() -> SqliteStore {
        SqliteStore::new(create_test_db().await)
    }

    #[tokio::test]
    async fn test_expiration_upsert_and_idle_query() {
        contract::expiration_upsert_and_idle_query(&store().await).await;
    }

    #[tokio::test]
    async fn test_run_timeout_ignores_expiration() {
        contract::run_timeout_ignores_expiration(&store().await).await;
    }

    #[tokio::test]
    async fn test_created_time_initialises_stopped() {
        contract::created_time_initialises_stopped(&store().await).await;
    }

    #[tokio::test]
    async fn test_status_change_routes_to_column() {
        contract::status_change_routes_to_column(&store().await).await;
    }

    #[tokio::test]
    async fn test_status_queries_and_paging() {
        contract::status_queries_and_paging(&store().await).await;
    }

    #[tokio::test]
    async fn test_create_conflicts_and_remove() {
        contract::create_conflicts_and_remove(&store().await).await;
    }
}
