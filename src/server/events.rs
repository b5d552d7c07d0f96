//! Event intake endpoint.
//!
//! Verifies the signature, parses the event and hands it to the dispatcher.
//! Processing happens asynchronously; a 202 only means the event was queued.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use super::signature::verify_signature;
use crate::worker::TrainEvent;

/// Header carrying the body signature.
pub const HEADER_SIGNATURE: &str = "x-train-signature";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid event: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("event dispatcher is not running")]
    DispatcherGone,
}

impl IntoResponse for EventError {
    fn into_response(self) -> Response {
        let status = match &self {
            EventError::InvalidSignature => StatusCode::UNAUTHORIZED,
            EventError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            EventError::DispatcherGone => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

/// `POST /events`
///
/// - 202 Accepted: the event was queued
/// - 400 Bad Request: the body is not a valid event
/// - 401 Unauthorized: missing or wrong signature
/// - 503 Service Unavailable: the dispatcher has stopped
pub async fn events_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), EventError> {
    let signature = headers
        .get(HEADER_SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_signature(&body, signature, app_state.secret()) {
        warn!("rejected event with invalid signature");
        return Err(EventError::InvalidSignature);
    }

    let event: TrainEvent = serde_json::from_slice(&body)?;
    let kind = event.kind();
    app_state
        .events()
        .send(event)
        .await
        .map_err(|_| EventError::DispatcherGone)?;

    debug!(event = kind, "event queued");
    Ok((StatusCode::ACCEPTED, "Accepted"))
}
