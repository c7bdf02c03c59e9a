use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": state.config.service_name,
        "version": state.config.service_version,
    }))
}

/// Ready when both the store and the revocation cache answer.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.store.ping().await;
    let cache = tokio::time::timeout(state.config.cache_timeout(), state.cache.health_check()).await;

    let store_ok = store.is_ok();
    let cache_ok = matches!(cache, Ok(Ok(())));

    if let Err(e) = &store {
        tracing::warn!(error = %e, "Store readiness check failed");
    }
    if !cache_ok {
        tracing::warn!("Revocation cache readiness check failed");
    }

    let status = if store_ok && cache_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ready" } else { "unavailable" },
            "store": store_ok,
            "revocation_cache": cache_ok,
        })),
    )
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        body,
    )
}
