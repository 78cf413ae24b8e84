//! Health probe and Prometheus metrics.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

/// GET /api/health — liveness with per-component booleans and semver.
pub async fn health(State(state): State<AppState>) -> Response {
    let storage_ok = state.store.schema_version("core").is_ok()
        && state.store.schema_version("agents").is_ok()
        && state.store.schema_version("memory").is_ok();

    let ok = storage_ok;
    Json(serde_json::json!({
        "ok": ok,
        "version": env!("CARGO_PKG_VERSION"),
        "components": {
            "storage": storage_ok,
            "providers": state.providers_ok,
            "embeddings": state.embeddings_ok,
            "auth": state.signer.is_some(),
        },
        "active_debates": state.active_debates(),
    }))
    .into_response()
}

/// GET /metrics — Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let body = state
        .metrics
        .render(state.sink.published(), state.active_debates());
    (
        [("Content-Type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
