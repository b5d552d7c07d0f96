//! Exclusive per-merge-request leases.
//!
//! Refreshes of one car must not overlap. Refreshes of different cars may.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::MergeRequestId;

#[derive(Debug, Default)]
pub struct CarLeases {
    leases: Mutex<HashMap<MergeRequestId, Arc<Mutex<()>>>>,
}

impl CarLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no one else holds the lease for `id`, then takes it.
    /// The lease is released when the guard drops.
    pub async fn acquire(&self, id: MergeRequestId) -> OwnedMutexGuard<()> {
        let lease = {
            let mut leases = self.leases.lock().await;
            // Only the map holds an unused lease.
            leases.retain(|_, lease| Arc::strong_count(lease) > 1);
            leases.entry(id).or_default().clone()
        };
        lease.lock_owned().await
    }

    /// Number of leases currently tracked.
    pub async fn len(&self) -> usize {
        self.leases.lock().await.len()
    }
}
