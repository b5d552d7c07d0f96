//! Creates pipelines for train refs and cancels the ones they supersede.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::services::{
    CancelPipelineError, CreatePipelineError, CreatePipelineRequest, PipelineService, ServiceError,
};
use crate::types::{Car, MergeRequest, Pipeline, PipelineId, RefBuildResult, Sha};

#[derive(Debug, Error)]
pub enum PipelineTriggerError {
    #[error("pipeline could not be created: {details}")]
    Rejected { details: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<CreatePipelineError> for PipelineTriggerError {
    fn from(err: CreatePipelineError) -> Self {
        match err {
            CreatePipelineError::Rejected { details } => PipelineTriggerError::Rejected { details },
            CreatePipelineError::Service(e) => PipelineTriggerError::Service(e),
        }
    }
}

pub struct PipelineTrigger<P> {
    pipelines: Arc<P>,
    cancel_superseded: bool,
}

impl<P: PipelineService> PipelineTrigger<P> {
    pub fn new(pipelines: Arc<P>, cancel_superseded: bool) -> Self {
        PipelineTrigger {
            pipelines,
            cancel_superseded,
        }
    }

    /// Creates a pipeline for the car's train ref at the built commit, then
    /// cancels the car's previous pipeline.
    ///
    /// `target_sha` is the predecessor commit the build was based on.
    pub async fn trigger(
        &self,
        car: &Car,
        merge_request: &MergeRequest,
        build: &RefBuildResult,
        target_sha: &Sha,
    ) -> Result<Pipeline, PipelineTriggerError> {
        let request = CreatePipelineRequest {
            project: car.project_id,
            merge_request: car.merge_request_id,
            ref_name: car.train_ref(),
            sha: build.commit_sha.clone(),
            target_sha: target_sha.clone(),
            source_sha: merge_request.diff_head_sha.clone(),
            triggered_by: car.added_by,
        };
        let pipeline = self.pipelines.create_pipeline(request).await?;
        info!(
            merge_request = %car.merge_request_id,
            pipeline = %pipeline.id,
            sha = %pipeline.sha.short(),
            "created train pipeline"
        );

        if self.cancel_superseded
            && let Some(old) = car.pipeline_id.filter(|old| *old != pipeline.id)
        {
            self.cancel(old, Some(pipeline.id)).await;
        }
        Ok(pipeline)
    }

    /// Fetches a pipeline.
    pub async fn find(&self, id: PipelineId) -> Result<Option<Pipeline>, ServiceError> {
        self.pipelines.find_pipeline(id).await
    }

    /// Cancels a pipeline, tolerating pipelines that already finished or
    /// vanished. Other failures are logged.
    pub async fn cancel(&self, id: PipelineId, superseded_by: Option<PipelineId>) {
        match self.pipelines.cancel_pipeline(id, superseded_by).await {
            Ok(()) => debug!(pipeline = %id, ?superseded_by, "canceled pipeline"),
            Err(CancelPipelineError::AlreadyTerminal(_) | CancelPipelineError::NotFound(_)) => {
                debug!(pipeline = %id, "pipeline already finished; nothing to cancel")
            }
            Err(CancelPipelineError::Service(e)) => {
                warn!(pipeline = %id, error = %e, "failed to cancel pipeline")
            }
        }
    }
}
