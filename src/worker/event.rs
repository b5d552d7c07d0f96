//! Events that drive the trains.

use serde::{Deserialize, Serialize};

use crate::queue::Placement;
use crate::types::{MergeRequest, MergeRequestId, PipelineId, TrainKey, UserId};

/// Something happened that may let a car advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrainEvent {
    /// A user asked to merge via the train.
    MergeRequestAdded {
        merge_request: MergeRequest,
        user: UserId,
        #[serde(default)]
        placement: Placement,
    },

    /// The merge request changed: a push, a close, a draft toggle, or an
    /// auto-merge change.
    MergeRequestUpdated { merge_request: MergeRequest },

    /// The user took the merge request off auto-merge.
    AutoMergeCanceled { merge_request: MergeRequestId },

    PipelineStatusChanged { pipeline: PipelineId },

    /// The target branch moved outside the train.
    TargetBranchPushed { train: TrainKey },
}

impl TrainEvent {
    /// A short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TrainEvent::MergeRequestAdded { .. } => "merge_request_added",
            TrainEvent::MergeRequestUpdated { .. } => "merge_request_updated",
            TrainEvent::AutoMergeCanceled { .. } => "auto_merge_canceled",
            TrainEvent::PipelineStatusChanged { .. } => "pipeline_status_changed",
            TrainEvent::TargetBranchPushed { .. } => "target_branch_pushed",
        }
    }
}
