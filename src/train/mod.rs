//! The train engine: building refs, running pipelines, merging cars, and
//! the orchestrator that sequences them.

mod car_merger;
mod orchestrator;
mod pipeline_trigger;
mod ref_builder;
mod service;

pub use car_merger::{CarMergeError, CarMerger};
pub use orchestrator::{OrchestratorError, RefreshOptions, RefreshOrchestrator, Result};
pub use pipeline_trigger::{PipelineTrigger, PipelineTriggerError};
pub use ref_builder::{PreviousRef, RefBuildError, RefBuilder};
pub use service::{AddError, TrainService};
