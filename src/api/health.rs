use crate::api::MgmtState;
use crate::api::schemas::health::HealthResponse;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

/// Liveness check: returns 200 OK as long as the server is running.
pub async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness check: verifies that the token stores are reachable.
pub async fn readyz(State(state): State<MgmtState>) -> impl IntoResponse {
    let (status_code, storage_status) = match state.health_service.check_storage().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, component = "storage", "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "error")
        }
    };

    let response = HealthResponse { status: storage_status.to_string(), storage: storage_status.to_string() };

    (status_code, Json(response))
}
