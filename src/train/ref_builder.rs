//! Builds the private train ref of a car.
//!
//! The train ref holds the merge of the car's source onto its predecessor's
//! train ref (or onto the target branch for the head), so the car's pipeline
//! tests exactly what the target branch will look like once everything in
//! front of it has merged.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::services::{CreateRefError, CreateRefRequest, RefService, ServiceError};
use crate::types::{Car, MergeRequest, ProjectId, RefBuildResult, Sha};

/// The ref a car is built on, with the sha it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousRef {
    pub name: String,
    pub sha: Sha,
}

#[derive(Debug, Error)]
pub enum RefBuildError {
    #[error("merge conflict: {details}")]
    Conflict { details: String },

    #[error("previous ref {ref_name} does not exist")]
    PreviousRefMissing { ref_name: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<CreateRefError> for RefBuildError {
    fn from(err: CreateRefError) -> Self {
        match err {
            CreateRefError::Conflict { details } => RefBuildError::Conflict { details },
            CreateRefError::BaseRefMissing { ref_name } => {
                RefBuildError::PreviousRefMissing { ref_name }
            }
            CreateRefError::Service(e) => RefBuildError::Service(e),
        }
    }
}

pub struct RefBuilder<R> {
    refs: Arc<R>,
}

impl<R: RefService> RefBuilder<R> {
    pub fn new(refs: Arc<R>) -> Self {
        RefBuilder { refs }
    }

    /// Returns the build for `car` on top of `previous`.
    ///
    /// Unless `force` is set, the cached build is reused when it was made from
    /// the same previous sha and source sha and the train ref still points at
    /// it; a retry after a failed pipeline creation therefore does not rewrite
    /// the ref.
    pub async fn build(
        &self,
        car: &Car,
        merge_request: &MergeRequest,
        previous: &PreviousRef,
        force: bool,
    ) -> Result<RefBuildResult, RefBuildError> {
        let train_ref = car.train_ref();

        let cached = if force {
            None
        } else {
            self.reusable(car, merge_request, previous, &train_ref).await?
        };
        if let Some(cached) = cached {
            debug!(
                merge_request = %car.merge_request_id,
                sha = %cached.commit_sha.short(),
                "reusing train ref"
            );
            return Ok(cached);
        }

        let request = CreateRefRequest {
            project: car.project_id,
            target_ref: train_ref,
            base_ref: previous.name.clone(),
            base_sha: previous.sha.clone(),
            source_sha: merge_request.diff_head_sha.clone(),
            merge_commit_message: merge_request.merge_commit_message(),
            squash_commit_message: merge_request.squash_commit_message(),
        };
        let build = self.refs.create_ref(request).await?;

        info!(
            merge_request = %car.merge_request_id,
            base = %previous.name,
            base_sha = %previous.sha.short(),
            sha = %build.commit_sha.short(),
            "built train ref"
        );
        Ok(build)
    }

    async fn reusable(
        &self,
        car: &Car,
        merge_request: &MergeRequest,
        previous: &PreviousRef,
        train_ref: &str,
    ) -> Result<Option<RefBuildResult>, ServiceError> {
        let Some(cached) = &car.build else {
            return Ok(None);
        };
        let inputs_unchanged = car.previous_ref_sha.as_ref() == Some(&previous.sha)
            && car.source_sha.as_ref() == Some(&merge_request.diff_head_sha);
        if !inputs_unchanged {
            return Ok(None);
        }
        let current = self.refs.resolve_ref(car.project_id, train_ref).await?;
        Ok((current.as_ref() == Some(&cached.commit_sha)).then(|| cached.clone()))
    }

    /// Resolves a ref in the car's project.
    pub async fn resolve(&self, project: ProjectId, ref_name: &str) -> Result<Option<Sha>, ServiceError> {
        self.refs.resolve_ref(project, ref_name).await
    }

    /// Deletes the car's train ref. Failures are logged, never returned.
    pub async fn cleanup(&self, car: &Car) {
        let train_ref = car.train_ref();
        if let Err(e) = self.refs.delete_ref(car.project_id, &train_ref).await {
            warn!(
                merge_request = %car.merge_request_id,
                train_ref = %train_ref,
                error = %e,
                "failed to delete train ref"
            );
        }
    }
}
