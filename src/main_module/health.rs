//! Liveness and readiness endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use crate::core::shared::state::AppState;

const SERVICE: &str = "crmserver";

/// Readiness: reports `degraded` with 503 when no pooled connection can be
/// checked out.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let pool = state.conn.clone();
    let db_ok = tokio::task::spawn_blocking(move || pool.get().is_ok())
        .await
        .unwrap_or(false);

    let (code, status) = if db_ok {
        (StatusCode::OK, "healthy")
    } else {
        log::warn!("Health check: database unavailable");
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": SERVICE,
            "version": env!("CARGO_PKG_VERSION"),
            "database": db_ok
        })),
    )
}

/// Liveness: never touches the database.
pub async fn health_check_simple() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": SERVICE,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
