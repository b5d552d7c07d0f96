//! CI pipeline operations.

use std::future::Future;

use super::error::{CancelPipelineError, CreatePipelineError, ServiceError};
use crate::types::{MergeRequestId, Pipeline, PipelineId, ProjectId, Sha, UserId};

/// Request to run a pipeline for a train ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePipelineRequest {
    pub project: ProjectId,
    pub merge_request: MergeRequestId,
    pub ref_name: String,
    /// The commit to test; the train ref's tip at build time.
    pub sha: Sha,
    /// The predecessor ref's commit the train ref was built on.
    pub target_sha: Sha,
    /// The merge request's head commit.
    pub source_sha: Sha,
    /// Runs as the user who added the car.
    pub triggered_by: UserId,
}

/// Creates, inspects and cancels pipelines.
pub trait PipelineService {
    fn create_pipeline(
        &self,
        request: CreatePipelineRequest,
    ) -> impl Future<Output = Result<Pipeline, CreatePipelineError>> + Send;

    /// Returns the pipeline, or `None` if CI no longer knows it.
    fn find_pipeline(
        &self,
        id: PipelineId,
    ) -> impl Future<Output = Result<Option<Pipeline>, ServiceError>> + Send;

    /// Cancels a pipeline that a newer one replaced.
    fn cancel_pipeline(
        &self,
        id: PipelineId,
        superseded_by: Option<PipelineId>,
    ) -> impl Future<Output = Result<(), CancelPipelineError>> + Send;
}
