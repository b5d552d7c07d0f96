//! Train inspection endpoint.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::types::{Car, ProjectId, TrainKey};

#[derive(Debug, Deserialize)]
pub struct TrainQuery {
    pub branch: String,
}

/// A train as returned by the API. Cars are ordered head first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainView {
    pub train: TrainKey,
    pub cars: Vec<Car>,
}

/// `GET /api/v1/projects/{project}/train?branch=<name>`
///
/// A branch without cars returns an empty train.
pub async fn train_handler(
    State(app_state): State<AppState>,
    Path(project): Path<u64>,
    Query(query): Query<TrainQuery>,
) -> Json<TrainView> {
    let train = TrainKey::new(ProjectId(project), query.branch);
    let cars = app_state.store().cars(&train).await;
    Json(TrainView { train, cars })
}
