//! Merge trains - ordered queues of merge requests that are tested together
//! and merged one at a time against a moving target branch.
//!
//! Each car on a train is built on top of the car in front of it (or the
//! target branch for the head), gets its own pipeline, and merges once it
//! is at the head and that pipeline has passed. The library owns the queue,
//! the per-car state machine and the refresh algorithm; repositories, CI and
//! the merge itself are reached through the traits in [`services`].

pub mod config;
pub mod persistence;
pub mod queue;
pub mod server;
pub mod services;
pub mod train;
pub mod types;
pub mod worker;

#[cfg(test)]
mod test_utils;
