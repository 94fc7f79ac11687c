//! Integration tests for the activity and health endpoints

mod common;

use axum::http::StatusCode;
use common::{extract_json_body, TestClient, IDLE, NOW};
use serde_json::Value;
use ws_activity::{ActivityStore, Workspace, WorkspaceActivity, WorkspaceStatus};

#[tokio::test]
async fn test_health_endpoints() {
    let client = TestClient::new().await;

    let response = client.send("GET", "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["service"], "ws-api");

    let response = client.send("GET", "/health/ready").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_ping_on_running_workspace_sets_expiration() {
    let client = TestClient::new().await;
    client
        .workspaces
        .add(Workspace::new("ws1"), WorkspaceStatus::Running);

    let response = client.send("PUT", "/api/v1/activity/ws1").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let activity = client.store.find_activity("ws1").await.unwrap().unwrap();
    assert_eq!(activity.expiration, Some(NOW + IDLE));

    // a later ping moves the window
    client.clock.advance(60_000);
    client.send("PUT", "/api/v1/activity/ws1").await;
    let activity = client.store.find_activity("ws1").await.unwrap().unwrap();
    assert_eq!(activity.expiration, Some(NOW + 60_000 + IDLE));
}

#[tokio::test]
async fn test_ping_on_stopped_workspace_is_ignored() {
    let client = TestClient::new().await;
    client
        .workspaces
        .add(Workspace::new("ws1"), WorkspaceStatus::Stopped);

    let response = client.send("PUT", "/api/v1/activity/ws1").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(client.store.find_activity("ws1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_ping_survives_status_lookup_failure() {
    let client = TestClient::new().await;
    client
        .workspaces
        .add(Workspace::new("ws1"), WorkspaceStatus::Running);
    client.workspaces.fail_status("cluster unreachable");

    let response = client.send("PUT", "/api/v1/activity/ws1").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(client.store.find_activity("ws1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_activity() {
    let client = TestClient::new().await;
    client
        .store
        .set_status_change_time("ws1", WorkspaceStatus::Running, 42)
        .await
        .unwrap();

    let response = client.send("GET", "/api/v1/activity/ws1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let activity: WorkspaceActivity = extract_json_body(response).await;
    assert_eq!(activity.last_running, Some(42));
    assert_eq!(activity.status, Some(WorkspaceStatus::Running));
}

#[tokio::test]
async fn test_get_missing_activity_is_404() {
    let client = TestClient::new().await;

    let response = client.send("GET", "/api/v1/activity/ghost").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = extract_json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("ghost"));
}
