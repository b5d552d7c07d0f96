//! CI pipeline references.
//!
//! Pipelines are owned by the CI system; the train only records which
//! pipeline belongs to which car and reads back its status.

use serde::{Deserialize, Serialize};

use super::ids::{PipelineId, Sha};

/// Status of a CI pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Created,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl PipelineStatus {
    /// Returns true while the pipeline may still change status.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Created | PipelineStatus::Pending | PipelineStatus::Running
        )
    }

    /// Returns true once the pipeline has reached a terminal status.
    pub fn is_complete(&self) -> bool {
        !self.is_active()
    }

    /// Returns true for the single status that allows a merge.
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineStatus::Success)
    }
}

/// A pipeline as reported by the CI system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    /// The ref the pipeline was created for (a train ref).
    pub ref_name: String,
    /// The commit the pipeline checked out.
    pub sha: Sha,
    pub status: PipelineStatus,
}
