//! Event dispatch: turns [`TrainEvent`]s into train operations.
//!
//! ```text
//! ┌─────────────┐     ┌──────────┐     ┌────────────────────┐
//! │   axum      │ ──► │  mpsc    │ ──► │ task per event     │ ──► refresh (leased per car)
//! │  (accepts)  │     │ channel  │     └────────────────────┘
//! └─────────────┘     └──────────┘
//! ```
//!
//! The dispatcher keeps the latest snapshot of every merge request it has
//! seen, since the orchestrator works from snapshots and never loads them.
//! Events for different cars run concurrently. Refreshes of one car are
//! serialized by [`CarLeases`].

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::event::TrainEvent;
use super::lease::CarLeases;
use super::retry::{RetryConfig, retry_with_backoff};
use crate::queue::{Placement, StoreError, TrainStore};
use crate::services::{MergeService, PipelineService, RefService};
use crate::train::{AddError, OrchestratorError, RefreshOptions, TrainService};
use crate::types::{DequeueCause, MergeRequest, MergeRequestId, RefreshOutcome, TrainKey, UserId};

/// Errors that can occur while handling an event.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("refresh failed: {0}")]
    Refresh(#[from] OrchestratorError),

    #[error(transparent)]
    Add(#[from] AddError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Per-car outcomes of handling one event.
pub type Outcomes = Vec<(MergeRequestId, RefreshOutcome)>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatcherConfig {
    /// Capacity of the event channel.
    pub channel_buffer: usize,

    /// Backoff for transient collaborator errors.
    pub retry: RetryConfig,
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Creates the event channel the server sends into.
    pub fn channel(&self) -> (mpsc::Sender<TrainEvent>, mpsc::Receiver<TrainEvent>) {
        mpsc::channel(self.channel_buffer)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            channel_buffer: 256,
            retry: RetryConfig::DEFAULT,
        }
    }
}

pub struct Dispatcher<R, P, M> {
    service: TrainService<R, P, M>,
    leases: CarLeases,
    snapshots: RwLock<HashMap<MergeRequestId, MergeRequest>>,
    config: DispatcherConfig,
}

impl<R, P, M> Dispatcher<R, P, M>
where
    R: RefService + Send + Sync + 'static,
    P: PipelineService + Send + Sync + 'static,
    M: MergeService + Send + Sync + 'static,
{
    pub fn new(service: TrainService<R, P, M>, config: DispatcherConfig) -> Self {
        Dispatcher {
            service,
            leases: CarLeases::new(),
            snapshots: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<TrainStore> {
        self.service.orchestrator().store()
    }

    /// Returns the latest snapshot of a merge request.
    pub async fn snapshot(&self, id: MergeRequestId) -> Option<MergeRequest> {
        self.snapshots.read().await.get(&id).cloned()
    }

    /// Records a snapshot without acting on it, for example when warming the
    /// cache after a restart.
    pub async fn remember(&self, merge_request: MergeRequest) {
        self.snapshots
            .write()
            .await
            .insert(merge_request.id, merge_request);
    }

    /// Handles one event to completion.
    #[instrument(skip(self, event), fields(event = event.kind()))]
    pub async fn handle(&self, event: TrainEvent) -> Result<Outcomes> {
        match event {
            TrainEvent::MergeRequestAdded {
                merge_request,
                user,
                placement,
            } => self.add(merge_request, user, placement).await,
            TrainEvent::MergeRequestUpdated { merge_request } => {
                let id = merge_request.id;
                self.remember(merge_request).await;
                if self.store().car(id).await.is_none() {
                    debug!(merge_request = %id, "updated merge request is not on a train");
                    return Ok(Vec::new());
                }
                self.refresh_car_and_followers(id).await
            }
            TrainEvent::AutoMergeCanceled { merge_request } => {
                let removed = self
                    .service
                    .remove_merge_request(merge_request, DequeueCause::Removed)
                    .await?;
                match removed {
                    Some(car) => self.refresh_train(&car.train_key()).await,
                    None => Ok(Vec::new()),
                }
            }
            TrainEvent::PipelineStatusChanged { pipeline } => {
                let Some(car) = self.store().find_by_pipeline(pipeline).await else {
                    debug!(pipeline = %pipeline, "pipeline does not belong to a car");
                    return Ok(Vec::new());
                };
                self.refresh_car_and_followers(car.merge_request_id).await
            }
            TrainEvent::TargetBranchPushed { train } => self.refresh_train(&train).await,
        }
    }

    async fn add(&self, merge_request: MergeRequest, user: UserId, placement: Placement) -> Result<Outcomes> {
        let key = merge_request.train_key();
        self.remember(merge_request.clone()).await;
        match self
            .service
            .add_merge_request(&merge_request, user, placement)
            .await
        {
            Ok(_) => {}
            Err(AddError::AlreadyOnTrain { .. }) => {
                debug!(merge_request = %merge_request.id, "already on train");
            }
            Err(e) => return Err(e.into()),
        }
        self.refresh_train(&key).await
    }

    /// Refreshes one car, then the whole train if the car left it.
    async fn refresh_car_and_followers(&self, id: MergeRequestId) -> Result<Outcomes> {
        let Some(car) = self.store().car(id).await else {
            return Ok(Vec::new());
        };
        let Some(outcome) = self.refresh_car(id).await? else {
            return Ok(Vec::new());
        };

        let changed = outcome.train_changed();
        let mut outcomes = vec![(id, outcome)];
        if changed {
            outcomes.extend(self.refresh_train(&car.train_key()).await?);
        }
        Ok(outcomes)
    }

    /// Refreshes every car of a train, head first.
    ///
    /// A car whose refresh fails is logged and skipped so the cars behind it
    /// still advance. The first failure is returned once the pass is done.
    #[instrument(skip(self), fields(train = %key))]
    pub async fn refresh_train(&self, key: &TrainKey) -> Result<Outcomes> {
        let mut outcomes = Vec::new();
        let mut first_error = None;
        for car in self.store().cars(key).await {
            match self.refresh_car(car.merge_request_id).await {
                Ok(Some(outcome)) => outcomes.push((car.merge_request_id, outcome)),
                Ok(None) => {}
                Err(e) => {
                    error!(merge_request = %car.merge_request_id, error = %e, "car refresh failed; continuing with train");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// Refreshes one car under its lease, retrying transient failures.
    ///
    /// Returns `None` if no snapshot of the merge request is known.
    async fn refresh_car(&self, id: MergeRequestId) -> Result<Option<RefreshOutcome>> {
        let _lease = self.leases.acquire(id).await;
        let Some(merge_request) = self.snapshot(id).await else {
            warn!(merge_request = %id, "no snapshot for car; skipping refresh");
            return Ok(None);
        };

        let orchestrator = self.service.orchestrator();
        let snapshot = &merge_request;
        let outcome = retry_with_backoff(self.config.retry, move || {
            orchestrator.refresh(snapshot, RefreshOptions::default())
        })
        .await?;

        if matches!(
            outcome,
            RefreshOutcome::Merged { .. } | RefreshOutcome::AlreadyMerged
        ) {
            self.snapshots.write().await.remove(&id);
        }
        Ok(Some(outcome))
    }

    /// Consumes events until the channel closes or `shutdown` fires, then
    /// waits for in-flight events to finish.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<TrainEvent>, shutdown: CancellationToken) {
        info!("dispatcher started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "event task panicked");
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let dispatcher = Arc::clone(&self);
                    tasks.spawn(async move {
                        let kind = event.kind();
                        if let Err(e) = dispatcher.handle(event).await {
                            error!(event = kind, error = %e, "failed to handle event");
                        }
                    });
                }
            }
        }

        let in_flight = tasks.len();
        while tasks.join_next().await.is_some() {}
        info!(in_flight, "dispatcher stopped");
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
