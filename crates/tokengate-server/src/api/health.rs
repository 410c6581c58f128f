use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::Arc;
use tokengate_federation::PendingSessionStore;
use tokengate_signing::{CircuitState, SigningBackend};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Liveness check
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    status: &'static str,
    signing: &'static str,
    algorithm: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    circuit: Option<String>,
    pending_logins: usize,
}

/// Readiness check: the signing backend must be able to sign.
///
/// An open breaker reports unavailable without issuing a probe signature.
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let backend = state.backend();
    let circuit = backend.circuit_state();
    let healthy = match circuit {
        Some(CircuitState::Open) => false,
        _ => backend.health_check().await,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if healthy { "ready" } else { "unavailable" },
            signing: if healthy { "ok" } else { "failing" },
            algorithm: backend.algorithm().as_str(),
            circuit: circuit.map(|s| s.to_string()),
            pending_logins: state.sessions.len().await,
        }),
    )
}
