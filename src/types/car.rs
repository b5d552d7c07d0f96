//! Train car records and the car state machine.
//!
//! A car is one merge request's seat on a train. The stored record is small:
//! the persisted `CarStatus` only distinguishes idle, merging, merged and
//! aborted. The richer lifecycle (pipeline pending, running, succeeded...) is
//! a `CarPhase` derived from the record plus the current pipeline status, so
//! it can never disagree with the CI system.
//!
//! Transition methods are pure mutations. Persisting them atomically (with
//! optimistic locking on `lock_version`) is the store's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::ids::{MergeRequestId, PipelineId, ProjectId, Sha, TrainKey, UserId};
use super::merge_request::MergeRequest;
use super::pipeline::{Pipeline, PipelineStatus};

/// Returns the private ref a car's synthetic merge commit is written to.
pub fn train_ref_path(merge_request: MergeRequestId) -> String {
    format!("refs/merge-requests/{}/train", merge_request.0)
}

/// Returns the fully-qualified ref of a branch.
pub fn branch_ref_path(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

/// The synthetic merged state produced for a car.
///
/// Cached on the car so later steps (pipeline creation, the final merge)
/// use exactly the commits that were tested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefBuildResult {
    /// Tip of the train ref (what the pipeline checks out).
    pub commit_sha: Sha,
    /// The merge commit combining previous ref and source.
    pub merge_commit_sha: Sha,
    /// The squash commit, when the merge request squashes.
    pub squash_commit_sha: Option<Sha>,
}

/// Persisted status of a car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarStatus {
    /// Waiting for a pipeline, or for its turn at the head.
    Idle,
    /// A worker owns the merge of this car.
    Merging,
    /// The merge landed on the target branch.
    Merged,
    /// Removed from the train because of an error.
    Aborted,
}

impl fmt::Display for CarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CarStatus::Idle => "idle",
            CarStatus::Merging => "merging",
            CarStatus::Merged => "merged",
            CarStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Derived lifecycle phase of a car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarPhase {
    Idle,
    PipelinePending,
    PipelineRunning,
    PipelineSucceeded,
    /// The pipeline ended without success; the next refresh aborts the car.
    PipelineFailed,
    Merging,
    Merged,
    Aborted,
}

impl CarPhase {
    /// Returns true for phases a car never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CarPhase::Merged | CarPhase::Aborted)
    }

    /// Checks if a transition from this phase to the target phase is valid.
    ///
    /// Valid transitions:
    /// - any non-terminal phase -> Aborted
    /// - Idle / PipelinePending / PipelineRunning / PipelineSucceeded /
    ///   PipelineFailed -> PipelinePending (a rebuild supersedes the pipeline)
    /// - PipelinePending -> PipelineRunning | PipelineSucceeded | PipelineFailed
    /// - PipelineRunning -> PipelineSucceeded | PipelineFailed
    /// - PipelineSucceeded -> Merging
    /// - Merging -> Merged | PipelineSucceeded (merge released after a transient failure)
    pub fn can_transition_to(&self, target: &CarPhase) -> bool {
        use CarPhase::*;
        if *target == Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (
                Idle | PipelinePending | PipelineRunning | PipelineSucceeded | PipelineFailed,
                PipelinePending
            ) | (
                PipelinePending,
                PipelineRunning | PipelineSucceeded | PipelineFailed
            ) | (PipelineRunning, PipelineSucceeded | PipelineFailed)
                | (PipelineSucceeded, Merging)
                | (Merging, Merged | PipelineSucceeded)
        )
    }
}

impl fmt::Display for CarPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CarPhase::Idle => "idle",
            CarPhase::PipelinePending => "waiting for its pipeline",
            CarPhase::PipelineRunning => "its pipeline runs",
            CarPhase::PipelineSucceeded => "its pipeline passed",
            CarPhase::PipelineFailed => "its pipeline failed",
            CarPhase::Merging => "merging",
            CarPhase::Merged => "merged",
            CarPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A car transition was attempted from a phase that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("car for {merge_request} cannot {action} while {phase}")]
pub struct TransitionError {
    pub merge_request: MergeRequestId,
    pub action: &'static str,
    pub phase: CarPhase,
}

/// One merge request's participation in a train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub merge_request_id: MergeRequestId,
    pub project_id: ProjectId,
    pub target_branch: String,
    pub status: CarStatus,

    /// The current pipeline for this car's train ref.
    pub pipeline_id: Option<PipelineId>,

    /// Sha of the ref this car was built on: the predecessor's train ref tip,
    /// or the target branch tip for the first car. Only changes on rebuild.
    pub previous_ref_sha: Option<Sha>,

    /// The merge request head that went into the current build.
    pub source_sha: Option<Sha>,

    /// The synthetic merged state of the current build.
    pub build: Option<RefBuildResult>,

    /// Pipelines replaced by rebuilds, oldest first.
    pub superseded_pipelines: Vec<PipelineId>,

    /// Sha the target branch moved to when this car merged.
    pub merged_sha: Option<Sha>,

    pub added_by: UserId,

    /// Optimistic-concurrency version, bumped by every persisted transition.
    pub lock_version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Car {
    /// Creates an idle car for a merge request.
    pub fn new(merge_request: &MergeRequest, added_by: UserId) -> Self {
        let now = Utc::now();
        Car {
            merge_request_id: merge_request.id,
            project_id: merge_request.project,
            target_branch: merge_request.target_branch.clone(),
            status: CarStatus::Idle,
            pipeline_id: None,
            previous_ref_sha: None,
            source_sha: None,
            build: None,
            superseded_pipelines: Vec::new(),
            merged_sha: None,
            added_by,
            lock_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the key of the train this car rides.
    pub fn train_key(&self) -> TrainKey {
        TrainKey::new(self.project_id, self.target_branch.clone())
    }

    /// Returns the private train ref of this car.
    pub fn train_ref(&self) -> String {
        train_ref_path(self.merge_request_id)
    }

    /// Derives the lifecycle phase from the stored status and the pipeline.
    pub fn phase(&self, pipeline: Option<&Pipeline>) -> CarPhase {
        match self.status {
            CarStatus::Merging => return CarPhase::Merging,
            CarStatus::Merged => return CarPhase::Merged,
            CarStatus::Aborted => return CarPhase::Aborted,
            CarStatus::Idle => {}
        }
        match self.current_pipeline(pipeline).map(|p| p.status) {
            None => CarPhase::Idle,
            Some(PipelineStatus::Created | PipelineStatus::Pending) => CarPhase::PipelinePending,
            Some(PipelineStatus::Running) => CarPhase::PipelineRunning,
            Some(PipelineStatus::Success) => CarPhase::PipelineSucceeded,
            Some(PipelineStatus::Failed | PipelineStatus::Canceled | PipelineStatus::Skipped) => {
                CarPhase::PipelineFailed
            }
        }
    }

    /// Returns the pipeline only if it is the one recorded on this car.
    fn current_pipeline<'a>(&self, pipeline: Option<&'a Pipeline>) -> Option<&'a Pipeline> {
        pipeline.filter(|p| Some(p.id) == self.pipeline_id)
    }

    /// Returns true if the car must be rebuilt and re-pipelined.
    ///
    /// Derived, never stored: the car needs a new pipeline when it has none,
    /// when the ref it was built on is no longer what the predecessor (or the
    /// target branch) points at, or when the merge request head moved.
    pub fn requires_new_pipeline(&self, merge_request: &MergeRequest, previous_ref_sha: &Sha) -> bool {
        if self.pipeline_id.is_none() || self.build.is_none() {
            return true;
        }
        self.previous_ref_sha.as_ref() != Some(previous_ref_sha)
            || self.source_sha.as_ref() != Some(&merge_request.diff_head_sha)
    }

    /// Returns true unless the car's pipeline finished successfully.
    pub fn pipeline_not_succeeded(&self, pipeline: Option<&Pipeline>) -> bool {
        !self
            .current_pipeline(pipeline)
            .is_some_and(|p| p.status.is_success())
    }

    /// Returns true if the car's pipeline reached a terminal non-success status.
    pub fn pipeline_failed(&self, pipeline: Option<&Pipeline>) -> bool {
        self.current_pipeline(pipeline)
            .is_some_and(|p| p.status.is_complete() && !p.status.is_success())
    }

    /// Returns true iff the car may merge now.
    ///
    /// Requires an idle car at the head of its train whose pipeline succeeded
    /// on exactly the commit that was built for it.
    pub fn is_mergeable(&self, pipeline: Option<&Pipeline>, is_head: bool) -> bool {
        if self.status != CarStatus::Idle || !is_head || self.pipeline_not_succeeded(pipeline) {
            return false;
        }
        match (self.current_pipeline(pipeline), &self.build) {
            (Some(pipeline), Some(build)) => pipeline.sha == build.commit_sha,
            _ => false,
        }
    }

    /// Records a rebuilt ref and its new pipeline, superseding the old one.
    pub fn refresh_pipeline(
        &mut self,
        pipeline_id: PipelineId,
        build: RefBuildResult,
        previous_ref_sha: Sha,
        source_sha: Sha,
    ) -> Result<(), TransitionError> {
        self.advance(None, CarPhase::PipelinePending, "refresh its pipeline")?;
        if let Some(old) = self.pipeline_id.replace(pipeline_id)
            && old != pipeline_id
        {
            self.superseded_pipelines.push(old);
        }
        self.build = Some(build);
        self.previous_ref_sha = Some(previous_ref_sha);
        self.source_sha = Some(source_sha);
        Ok(())
    }

    /// Claims the merge of this car. `pipeline` must be the car's own
    /// pipeline, and it must have passed.
    pub fn start_merge(&mut self, pipeline: &Pipeline) -> Result<(), TransitionError> {
        self.advance(Some(pipeline), CarPhase::Merging, "start merging")?;
        self.status = CarStatus::Merging;
        Ok(())
    }

    /// Releases a claimed merge that did not happen.
    pub fn cancel_merge(&mut self) -> Result<(), TransitionError> {
        self.advance(None, CarPhase::PipelineSucceeded, "cancel merging")?;
        self.status = CarStatus::Idle;
        Ok(())
    }

    /// Marks the merge as landed.
    pub fn finish_merge(&mut self, merged_sha: Sha) -> Result<(), TransitionError> {
        self.advance(None, CarPhase::Merged, "finish merging")?;
        self.status = CarStatus::Merged;
        self.merged_sha = Some(merged_sha);
        Ok(())
    }

    /// Marks the car as aborted. Merged cars cannot be aborted.
    pub fn abort(&mut self) -> Result<(), TransitionError> {
        self.advance(None, CarPhase::Aborted, "abort")?;
        self.status = CarStatus::Aborted;
        Ok(())
    }

    fn advance(
        &self,
        pipeline: Option<&Pipeline>,
        target: CarPhase,
        action: &'static str,
    ) -> Result<(), TransitionError> {
        let phase = self.phase(pipeline);
        if phase.can_transition_to(&target) {
            Ok(())
        } else {
            Err(TransitionError {
                merge_request: self.merge_request_id,
                action,
                phase,
            })
        }
    }
}
