use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns hub status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let identified = state.hub.registry().live_identities().await.len() as u64;
    let metrics = state.metrics.snapshot();

    let status = if metrics.errors.store == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        connections: metrics.connections.active,
        identified,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed hub metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Legacy status probe polled by the console
pub async fn status_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_starts_healthy() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let (status, body) = get_json(crate::build_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["identified"], 0);
    }

    #[tokio::test]
    async fn test_health_degrades_after_store_error() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        state.metrics.store_error();
        let (_, body) = get_json(crate::build_router(state), "/health").await;
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_probes() {
        let (state, _tmp) = crate::test_helpers::test_app_state().await;
        let app = crate::build_router(state);

        let (status, body) = get_json(app.clone(), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "alive");

        let (_, body) = get_json(app.clone(), "/api/status").await;
        assert_eq!(body["status"], "ok");

        let (_, body) = get_json(app, "/metrics").await;
        assert_eq!(body["routing"]["messages_routed"], 0);
    }
}
