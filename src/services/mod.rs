//! Collaborator interfaces.
//!
//! The engine never talks to a repository, CI or the merge machinery
//! directly. It goes through these traits, so tests can substitute
//! in-memory fakes and embedders can plug in their own clients.

pub mod ci;
pub mod error;
pub mod git;
pub mod merge;
pub mod notify;

pub use ci::{CreatePipelineRequest, PipelineService};
pub use error::{
    CancelPipelineError, CreatePipelineError, CreateRefError, MergeError, ServiceError,
    ServiceErrorKind,
};
pub use git::{CreateRefRequest, RefService};
pub use merge::{MergeExecution, MergeResult, MergeService};
pub use notify::{LogNotifier, PolicyChecker, StaticPolicy, TrainNotifier};
