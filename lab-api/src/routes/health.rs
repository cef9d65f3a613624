use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is alive")),
    tag = "health"
)]
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "lab-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Accepting work"),
        (status = 503, description = "Draining before shutdown")
    ),
    tag = "health"
)]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let orchestrator = &state.orchestrator;
    let draining = orchestrator.is_draining();
    let status = if draining {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(json!({
            "status": if draining { "draining" } else { "ready" },
            "service": "lab-api",
            "version": env!("CARGO_PKG_VERSION"),
            "driver": orchestrator.driver_name(),
            "workspaces": orchestrator.workspace_count(),
            "active_workspaces": orchestrator.active_count()
        })),
    )
}
