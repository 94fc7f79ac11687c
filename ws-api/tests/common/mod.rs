//! Common test utilities and helpers for ws-api tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;
use ws_activity::test_utils::{create_test_db, FakeWorkspaces};
use ws_activity::{ActivityTracker, ExpirationPolicy, ManualClock, SqliteStore};
use ws_api::{create_app, AppState};

pub const NOW: i64 = 1_700_000_000_000;
pub const IDLE: i64 = 1_800_000;

pub struct TestClient {
    pub app: Router,
    pub store: Arc<SqliteStore>,
    pub workspaces: Arc<FakeWorkspaces>,
    pub clock: Arc<ManualClock>,
}

impl TestClient {
    /// App over a fresh in-memory database with idle expiry enabled.
    pub async fn new() -> Self {
        let store = Arc::new(SqliteStore::new(create_test_db().await));
        let workspaces = Arc::new(FakeWorkspaces::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let tracker = Arc::new(ActivityTracker::new(
            store.clone(),
            ExpirationPolicy::new(IDLE, 0),
            clock.clone(),
        ));
        let app = create_app(AppState::new(tracker, workspaces.clone(), clock.clone()));
        Self {
            app,
            store,
            workspaces,
            clock,
        }
    }

    pub async fn send(&self, method: &str, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.app.clone().oneshot(request).await.unwrap()
    }
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}
