//! HTTP surface for the train engine.
//!
//! # Endpoints
//!
//! - `POST /events` - Accepts signed [`TrainEvent`]s (returns 202 Accepted)
//! - `GET /api/v1/projects/{project}/train?branch=<name>` - Returns a train as JSON
//! - `GET /health` - Returns 200 if the server is running

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::queue::TrainStore;
use crate::worker::TrainEvent;

pub mod events;
pub mod health;
pub mod signature;
pub mod trains;

pub use events::{EventError, HEADER_SIGNATURE, events_handler};
pub use health::health_handler;
pub use signature::{sign_payload, verify_signature};
pub use trains::{TrainView, train_handler};

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Where accepted events go. The dispatcher holds the receiver.
    events: mpsc::Sender<TrainEvent>,

    store: Arc<TrainStore>,

    /// Shared secret for HMAC-SHA256 signature verification.
    secret: Vec<u8>,
}

impl AppState {
    pub fn new(events: mpsc::Sender<TrainEvent>, store: Arc<TrainStore>, secret: impl Into<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                events,
                store,
                secret: secret.into(),
            }),
        }
    }

    pub fn events(&self) -> &mpsc::Sender<TrainEvent> {
        &self.inner.events
    }

    pub fn store(&self) -> &Arc<TrainStore> {
        &self.inner.store
    }

    pub fn secret(&self) -> &[u8] {
        &self.inner.secret
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/events", post(events_handler))
        .route("/api/v1/projects/{project}/train", get(train_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
