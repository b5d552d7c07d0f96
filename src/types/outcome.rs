//! Results of advancing a car.
//!
//! A refresh either makes progress, waits, or aborts the car. Aborts are
//! values, not errors: they are ordinary domain outcomes that carry a
//! human-readable reason for the merge request author.

use serde::{Deserialize, Serialize};

use super::ids::{PipelineId, Sha};
use super::pipeline::PipelineStatus;

/// Reason why a car was removed from its train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// Merge trains are disabled for the project.
    FeatureDisabled,

    /// The merge request has no car on the train.
    NotOnTrain,

    /// The merge request was closed, locked or merged outside the train.
    NotOpen {
        /// The state the merge request is in.
        state: String,
    },

    /// The merge request was marked as draft.
    Draft,

    /// The source branch or diff is broken.
    Broken,

    /// Auto-merge was unset on the merge request.
    AutoMergeNotRequested,

    /// The ref this car should be built on does not resolve.
    ///
    /// Usually a race with the predecessor's own abort; the next refresh
    /// rebuilds against the new predecessor.
    PreviousRefMissing {
        /// The ref that was expected to exist.
        ref_name: String,
    },

    /// The merge request does not merge cleanly onto its predecessor.
    RefConflict {
        /// Details about the conflict.
        details: String,
    },

    /// CI refused to create a pipeline for the train ref.
    PipelineCreationFailed {
        /// Details from the CI system.
        details: String,
    },

    /// The car's pipeline finished without succeeding.
    PipelineFailed {
        /// The terminal status the pipeline ended in.
        status: PipelineStatus,
    },

    /// The final merge did not land although all preconditions held.
    MergeFailed {
        /// Details from the merge execution.
        details: String,
    },
}

impl AbortReason {
    /// Returns the error type string for logging/serialization.
    pub fn error_type(&self) -> &'static str {
        match self {
            AbortReason::FeatureDisabled => "feature_disabled",
            AbortReason::NotOnTrain => "not_on_train",
            AbortReason::NotOpen { .. } => "not_open",
            AbortReason::Draft => "draft",
            AbortReason::Broken => "broken",
            AbortReason::AutoMergeNotRequested => "auto_merge_not_requested",
            AbortReason::PreviousRefMissing { .. } => "previous_ref_missing",
            AbortReason::RefConflict { .. } => "ref_conflict",
            AbortReason::PipelineCreationFailed { .. } => "pipeline_creation_failed",
            AbortReason::PipelineFailed { .. } => "pipeline_failed",
            AbortReason::MergeFailed { .. } => "merge_failed",
        }
    }

    /// Returns a human-readable description of the abort reason.
    pub fn description(&self) -> String {
        match self {
            AbortReason::FeatureDisabled => {
                "merge trains are not enabled for this project".to_string()
            }
            AbortReason::NotOnTrain => "the merge request is not on a merge train".to_string(),
            AbortReason::NotOpen { state } => format!("the merge request is {}", state),
            AbortReason::Draft => "the merge request is marked as draft".to_string(),
            AbortReason::Broken => "the merge request is broken".to_string(),
            AbortReason::AutoMergeNotRequested => {
                "auto-merge is no longer requested for the merge request".to_string()
            }
            AbortReason::PreviousRefMissing { ref_name } => {
                format!("the previous ref {} does not exist", ref_name)
            }
            AbortReason::RefConflict { details } => {
                format!("the merge request could not be merged cleanly: {}", details)
            }
            AbortReason::PipelineCreationFailed { details } => {
                format!("failed to create a pipeline: {}", details)
            }
            AbortReason::PipelineFailed { .. } => "the pipeline did not succeed".to_string(),
            AbortReason::MergeFailed { details } => {
                format!("the merge request could not be merged: {}", details)
            }
        }
    }

    /// Returns true if a later event can heal the condition without the
    /// author changing the merge request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AbortReason::PreviousRefMissing { .. }
                | AbortReason::RefConflict { .. }
                | AbortReason::PipelineCreationFailed { .. }
        )
    }

    /// Returns true for aborts that indicate an inconsistency rather than a
    /// normal domain outcome.
    pub fn is_severe(&self) -> bool {
        matches!(self, AbortReason::MergeFailed { .. })
    }
}

/// Result of one refresh of a car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A train ref was (re)built and a new pipeline was created.
    PipelineCreated { pipeline: PipelineId },

    /// The car's pipeline is still pending or running.
    WaitingOnPipeline { pipeline: PipelineId },

    /// The car is fresh and green but not yet at the head.
    WaitingForTurn { pipeline: PipelineId },

    /// The predecessor has not built its train ref yet.
    WaitingOnPredecessor,

    /// The car is beyond the train's pipeline concurrency limit.
    WaitingForCapacity { index: usize },

    /// The car merged; the target branch now points at `sha`.
    Merged { sha: Sha },

    /// Another worker owns the merge of this car.
    MergeInProgress,

    /// Another refresh updated the car first; this one backed off.
    ConcurrentUpdate,

    /// Late event for a merge request that already merged.
    AlreadyMerged,

    /// The car was removed from the train.
    Aborted { reason: AbortReason },
}

impl RefreshOutcome {
    /// Returns true if the car left the train, so the cars behind it need a
    /// refresh to rebuild against their new predecessor.
    pub fn train_changed(&self) -> bool {
        matches!(
            self,
            RefreshOutcome::Merged { .. } | RefreshOutcome::Aborted { .. }
        )
    }
}

/// Why a car left its train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DequeueCause {
    Merged,
    Aborted,
    /// Removed on request, e.g. auto-merge was cancelled.
    Removed,
}
