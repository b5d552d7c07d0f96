//! Crash-safe journal of train state.
//!
//! Every mutation of the train store is appended to a JSON Lines journal
//! before it is applied in memory. On startup the store replays the journal
//! to rebuild every train.
//!
//! # Crash Safety
//!
//! - A torn final line is detected and truncated on replay
//! - Enqueue, status transitions and dequeue are fsynced before returning
//! - Pipeline-only car updates are batched; losing one costs a rebuild

pub mod event;
pub mod fsync;
pub mod log;

pub use event::{StateEvent, StateEventPayload};
pub use fsync::{fsync_dir, fsync_file, prepare_file};
pub use log::{EventLog, JournalError, Replay};
