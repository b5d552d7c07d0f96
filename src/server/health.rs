//! Liveness probe.

use axum::http::StatusCode;

/// `GET /health` answers 200 with `OK` while the server runs.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
