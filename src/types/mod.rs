//! Core domain types for merge trains.
//!
//! Identifiers, merge request and pipeline snapshots, the car record with its
//! state machine, and the outcomes of advancing a car.

pub mod car;
pub mod ids;
pub mod merge_request;
pub mod outcome;
pub mod pipeline;

pub use car::{
    Car, CarPhase, CarStatus, RefBuildResult, TransitionError, branch_ref_path, train_ref_path,
};
pub use ids::{MergeRequestId, PipelineId, ProjectId, Sha, TrainKey, UserId};
pub use merge_request::{MergeRequest, MergeRequestState};
pub use outcome::{AbortReason, DequeueCause, RefreshOutcome};
pub use pipeline::{Pipeline, PipelineStatus};
