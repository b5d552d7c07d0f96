//! Train queues and the store that owns them.

pub mod store;
pub mod train;

pub use store::{StoreError, TrainStore};
pub use train::{Placement, TrainQueue};
