use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "ws-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    // Check store connectivity
    let store_ok = state.store().get_all(1, 0).await.is_ok();

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if store_ok { "ready" } else { "not_ready" },
            "service": "ws-api",
            "version": env!("CARGO_PKG_VERSION"),
            "store": if store_ok { "connected" } else { "disconnected" }
        })),
    )
}
