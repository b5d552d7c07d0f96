//! Event-driven workers that keep the trains moving.
//!
//! - [`event`]: the events that drive trains
//! - [`dispatch`]: routes events to train operations
//! - [`lease`]: per-car exclusive leases
//! - [`retry`]: backoff for transient collaborator errors

mod dispatch;
mod event;
mod lease;
mod retry;

pub use dispatch::{DispatchError, Dispatcher, DispatcherConfig, Outcomes, Result};
pub use event::TrainEvent;
pub use lease::CarLeases;
pub use retry::{Retriable, RetryConfig, retry_with_backoff};
