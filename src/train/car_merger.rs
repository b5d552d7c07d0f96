//! Lands the head car on its target branch.

use std::sync::Arc;

use thiserror::Error;

use crate::config::MergeMethod;
use crate::services::{MergeError, MergeExecution, MergeService, ServiceError};
use crate::types::{Car, MergeRequest, MergeRequestId, Sha};

#[derive(Debug, Error)]
pub enum CarMergeError {
    /// The car has no build to merge. The orchestrator only merges built cars.
    #[error("{0} has no train ref to merge")]
    NotBuilt(MergeRequestId),

    /// The merge collaborator returned without merging.
    #[error("{0} was not merged")]
    NotMerged(MergeRequestId),

    #[error("merge failed: {details}")]
    Failed { details: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<MergeError> for CarMergeError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Failed { details } => CarMergeError::Failed { details },
            MergeError::Service(e) => CarMergeError::Service(e),
        }
    }
}

pub struct CarMerger<M> {
    merges: Arc<M>,
    method: MergeMethod,
}

impl<M: MergeService> CarMerger<M> {
    pub fn new(merges: Arc<M>, method: MergeMethod) -> Self {
        CarMerger { merges, method }
    }

    /// Merges the car's tested build. Returns the new target branch sha.
    pub async fn merge(&self, car: &Car, merge_request: &MergeRequest) -> Result<Sha, CarMergeError> {
        let build = car
            .build
            .as_ref()
            .ok_or(CarMergeError::NotBuilt(car.merge_request_id))?;
        let expected_source_sha = car
            .source_sha
            .clone()
            .ok_or(CarMergeError::NotBuilt(car.merge_request_id))?;

        let execution = MergeExecution {
            project: car.project_id,
            merge_request: car.merge_request_id,
            target_branch: car.target_branch.clone(),
            method: self.method,
            expected_source_sha,
            train_commit_sha: build.commit_sha.clone(),
            merge_commit_sha: build.merge_commit_sha.clone(),
            squash_commit_sha: build.squash_commit_sha.clone(),
            commit_message: merge_request.merge_commit_message(),
        };

        let result = self.merges.merge(execution).await?;
        if !result.merged {
            return Err(CarMergeError::NotMerged(car.merge_request_id));
        }
        Ok(result
            .merge_commit_sha
            .unwrap_or_else(|| build.commit_sha.clone()))
    }
}
