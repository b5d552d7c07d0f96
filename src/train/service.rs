//! User-facing entry points for putting merge requests on trains and taking
//! them off again.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use super::orchestrator::RefreshOrchestrator;
use crate::queue::{Placement, StoreError};
use crate::services::{MergeService, PipelineService, RefService};
use crate::types::{AbortReason, Car, DequeueCause, MergeRequest, MergeRequestId, TrainKey, UserId};

/// Why a merge request could not be added to a train.
#[derive(Debug, Error)]
pub enum AddError {
    /// The merge request fails a train precondition.
    #[error("cannot add to merge train: {}", .0.description())]
    Rejected(AbortReason),

    #[error("{0} has no target branch")]
    NoTargetBranch(MergeRequestId),

    #[error("{merge_request} is already on train {train}")]
    AlreadyOnTrain {
        merge_request: MergeRequestId,
        train: TrainKey,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AddError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyOnTrain {
                merge_request,
                train,
            } => AddError::AlreadyOnTrain {
                merge_request,
                train,
            },
            other => AddError::Store(other),
        }
    }
}

pub struct TrainService<R, P, M> {
    orchestrator: Arc<RefreshOrchestrator<R, P, M>>,
}

impl<R, P, M> TrainService<R, P, M>
where
    R: RefService,
    P: PipelineService,
    M: MergeService,
{
    pub fn new(orchestrator: Arc<RefreshOrchestrator<R, P, M>>) -> Self {
        TrainService { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<RefreshOrchestrator<R, P, M>> {
        &self.orchestrator
    }

    /// Puts a merge request on the train for its target branch.
    ///
    /// The car starts idle. Its first refresh builds the train ref.
    #[instrument(skip(self, merge_request), fields(merge_request = %merge_request.id))]
    pub async fn add_merge_request(&self, merge_request: &MergeRequest, user: UserId, placement: Placement) -> Result<Car, AddError> {
        if let Some(reason) = self.orchestrator.precondition_failure(merge_request) {
            return Err(AddError::Rejected(reason));
        }
        if merge_request.target_branch.is_empty() {
            return Err(AddError::NoTargetBranch(merge_request.id));
        }

        let store = self.orchestrator.store();
        let car = store.enqueue(Car::new(merge_request, user), placement).await?;
        let position = store.position(car.merge_request_id).await;
        info!(
            train = %car.train_key(),
            user = %user,
            ?position,
            "merge request added to train"
        );
        Ok(car)
    }

    /// Takes a merge request off its train without notifying the author.
    ///
    /// Returns the removed car, or `None` if it was not on a train.
    #[instrument(skip(self))]
    pub async fn remove_merge_request(&self, id: MergeRequestId, cause: DequeueCause) -> Result<Option<Car>, StoreError> {
        let Some(car) = self.orchestrator.store().dequeue(id, cause).await? else {
            return Ok(None);
        };
        self.orchestrator.teardown(&car).await;
        info!(train = %car.train_key(), ?cause, "merge request removed from train");
        Ok(Some(car))
    }
}
