//! Advances one car by one step.
//!
//! A refresh reads the car, its predecessor and its pipeline, then decides
//! exactly one of: wait, rebuild and re-pipeline, merge, or abort. Every
//! decision is re-derived from current state; nothing about freshness is
//! trusted from an earlier refresh.
//!
//! Domain failures (validation, conflicts, failed pipelines, merges that did
//! not land) abort the car and come back as [`RefreshOutcome::Aborted`].
//! Only infrastructure failures escape as [`OrchestratorError`], for the
//! caller to retry.
//!
//! # Concurrency
//!
//! There is no lock over a train. Car updates go through the store's
//! optimistic locking, so two refreshes racing on one car cannot both record
//! a pipeline or both start a merge. The loser backs off with
//! `ConcurrentUpdate` or `MergeInProgress`. Only the head car can merge, which
//! keeps merges in train order.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::car_merger::{CarMergeError, CarMerger};
use super::pipeline_trigger::{PipelineTrigger, PipelineTriggerError};
use super::ref_builder::{PreviousRef, RefBuildError, RefBuilder};
use crate::config::{RebuildPolicy, TrainConfig};
use crate::queue::{StoreError, TrainStore};
use crate::services::{
    LogNotifier, MergeService, PipelineService, PolicyChecker, RefService, ServiceError,
    StaticPolicy, TrainNotifier,
};
use crate::types::{
    AbortReason, Car, CarStatus, DequeueCause, MergeRequest, MergeRequestId, MergeRequestState,
    Pipeline, RefreshOutcome, Sha, TrainKey, branch_ref_path,
};

/// Errors that escape a refresh. All of them are infrastructure failures.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl OrchestratorError {
    /// Returns true if retrying the refresh later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::Service(e) => e.is_transient(),
            OrchestratorError::Store(_) => false,
        }
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Caller overrides for one refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Rebuild the train ref and re-pipeline even if the car looks fresh.
    pub require_recreate: bool,
}

impl RefreshOptions {
    pub fn recreate() -> Self {
        RefreshOptions {
            require_recreate: true,
        }
    }
}

/// What the car is built on.
enum Predecessor {
    Ready { previous: PreviousRef, is_head: bool },
    /// The car in front has not built its train ref yet.
    NotBuilt,
    /// The ref to build on does not resolve.
    Missing { ref_name: String },
}

/// Outcome of the rebuild step.
enum Rebuild {
    Recorded { car: Car, pipeline: Pipeline },
    Finished(RefreshOutcome),
}

pub struct RefreshOrchestrator<R, P, M> {
    store: Arc<TrainStore>,
    ref_builder: RefBuilder<R>,
    trigger: PipelineTrigger<P>,
    merger: CarMerger<M>,
    notifier: Arc<dyn TrainNotifier>,
    policy: Arc<dyn PolicyChecker>,
    config: TrainConfig,
}

impl<R, P, M> RefreshOrchestrator<R, P, M>
where
    R: RefService,
    P: PipelineService,
    M: MergeService,
{
    /// Creates an orchestrator that logs notifications and takes the feature
    /// flag from `config`.
    pub fn new(store: Arc<TrainStore>, refs: Arc<R>, pipelines: Arc<P>, merges: Arc<M>, config: TrainConfig) -> Self {
        RefreshOrchestrator {
            store,
            ref_builder: RefBuilder::new(refs),
            trigger: PipelineTrigger::new(pipelines, config.cancel_superseded_pipelines),
            merger: CarMerger::new(merges, config.merge_method),
            notifier: Arc::new(LogNotifier),
            policy: Arc::new(StaticPolicy::new(config.enabled)),
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn TrainNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn PolicyChecker>) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<TrainStore> {
        &self.store
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Returns why `merge_request` may not ride a train, if anything.
    pub fn precondition_failure(&self, merge_request: &MergeRequest) -> Option<AbortReason> {
        if !self.config.enabled || !self.policy.merge_trains_enabled(merge_request.project) {
            Some(AbortReason::FeatureDisabled)
        } else if !merge_request.state.is_open() {
            Some(AbortReason::NotOpen {
                state: merge_request.state.name().to_string(),
            })
        } else if merge_request.draft {
            Some(AbortReason::Draft)
        } else if merge_request.broken {
            Some(AbortReason::Broken)
        } else if !merge_request.auto_merge_enabled {
            Some(AbortReason::AutoMergeNotRequested)
        } else {
            None
        }
    }

    /// Advances the car of `merge_request` by one step.
    #[instrument(skip(self, merge_request), fields(merge_request = %merge_request.id))]
    pub async fn refresh(&self, merge_request: &MergeRequest, options: RefreshOptions) -> Result<RefreshOutcome> {
        let Some(car) = self.store.car(merge_request.id).await else {
            if merge_request.state.is_merged() {
                debug!("merge request already merged");
                return Ok(RefreshOutcome::AlreadyMerged);
            }
            debug!("merge request is not on a train");
            return Ok(RefreshOutcome::Aborted {
                reason: AbortReason::NotOnTrain,
            });
        };

        match car.status {
            CarStatus::Idle => {}
            CarStatus::Merging => {
                // A merge that landed but was never recorded (crash, journal
                // failure) is finished here once the snapshot shows it merged.
                if let MergeRequestState::Merged { merge_commit_sha } = &merge_request.state {
                    info!("completing merge recorded by the merge request");
                    return self.finish(car, merge_request, merge_commit_sha.clone()).await;
                }
                debug!("merge in progress elsewhere");
                return Ok(RefreshOutcome::MergeInProgress);
            }
            CarStatus::Merged => return Ok(RefreshOutcome::AlreadyMerged),
            CarStatus::Aborted => return Ok(RefreshOutcome::ConcurrentUpdate),
        }

        if let Some(reason) = self.precondition_failure(merge_request) {
            return self.abort(car, merge_request, reason).await;
        }

        let (previous, is_head) = match self.predecessor(&car).await? {
            Predecessor::Ready { previous, is_head } => (previous, is_head),
            Predecessor::NotBuilt => {
                debug!("predecessor has no train ref yet");
                return Ok(RefreshOutcome::WaitingOnPredecessor);
            }
            Predecessor::Missing { ref_name } => {
                return self
                    .abort(car, merge_request, AbortReason::PreviousRefMissing { ref_name })
                    .await;
            }
        };

        let mut pipeline = match car.pipeline_id {
            Some(id) => self.trigger.find(id).await?,
            None => None,
        };
        // A failed pipeline is never retried implicitly, even when its inputs
        // have since moved. Only an explicit recreate gets another run.
        if !options.require_recreate
            && let Some(failed) = pipeline.as_ref().filter(|p| car.pipeline_failed(Some(p)))
        {
            let reason = AbortReason::PipelineFailed {
                status: failed.status,
            };
            return self.abort(car, merge_request, reason).await;
        }

        let pipeline_lost = car.pipeline_id.is_some() && pipeline.is_none();
        let stale = pipeline_lost || car.requires_new_pipeline(merge_request, &previous.sha);

        let forced = options.require_recreate || self.policy_rebuild(&car, pipeline.as_ref(), is_head);
        let mut car = car;
        let mut created = None;
        if stale || forced {
            let index = self.store.position(car.merge_request_id).await.unwrap_or(0);
            if index >= self.config.max_concurrency {
                debug!(index, limit = self.config.max_concurrency, "waiting for pipeline capacity");
                return Ok(RefreshOutcome::WaitingForCapacity { index });
            }
            match self.rebuild(car, merge_request, &previous, forced).await? {
                Rebuild::Recorded {
                    car: recorded,
                    pipeline: new_pipeline,
                } => {
                    created = Some(new_pipeline.id);
                    car = recorded;
                    pipeline = Some(new_pipeline);
                }
                Rebuild::Finished(outcome) => return Ok(outcome),
            }
        }

        if car.is_mergeable(pipeline.as_ref(), is_head)
            && let Some(passed) = &pipeline
        {
            return self.merge(car, merge_request, passed).await;
        }

        let outcome = match (created, car.pipeline_id) {
            (Some(pipeline), _) => RefreshOutcome::PipelineCreated { pipeline },
            (None, Some(id)) if !car.pipeline_not_succeeded(pipeline.as_ref()) => {
                RefreshOutcome::WaitingForTurn { pipeline: id }
            }
            (None, Some(id)) => RefreshOutcome::WaitingOnPipeline { pipeline: id },
            // Unreachable: a car without a pipeline is always stale.
            (None, None) => RefreshOutcome::WaitingOnPredecessor,
        };
        debug!(?outcome, "refresh finished");
        Ok(outcome)
    }

    /// Refreshes every car of a train, head first.
    ///
    /// Cars whose merge request `lookup` does not know are skipped. Cars are
    /// refreshed one after another, so a merge at the head lets the next car
    /// merge in the same pass.
    #[instrument(skip(self, lookup), fields(train = %key))]
    pub async fn refresh_train<F>(&self, key: &TrainKey, lookup: F) -> Result<Vec<(MergeRequestId, RefreshOutcome)>>
    where
        F: Fn(MergeRequestId) -> Option<MergeRequest> + Send + Sync,
    {
        let mut outcomes = Vec::new();
        for car in self.store.cars(key).await {
            let Some(merge_request) = lookup(car.merge_request_id) else {
                warn!(merge_request = %car.merge_request_id, "no snapshot for car; skipping");
                continue;
            };
            let outcome = self.refresh(&merge_request, RefreshOptions::default()).await?;
            outcomes.push((car.merge_request_id, outcome));
        }
        Ok(outcomes)
    }

    /// Cancels a car's pipeline and deletes its train ref.
    pub async fn teardown(&self, car: &Car) {
        if let Some(pipeline) = car.pipeline_id {
            self.trigger.cancel(pipeline, None).await;
        }
        self.ref_builder.cleanup(car).await;
    }

    async fn predecessor(&self, car: &Car) -> Result<Predecessor> {
        let (ref_name, is_head) = match self.store.previous(car.merge_request_id).await {
            Some(previous) if previous.build.is_none() => return Ok(Predecessor::NotBuilt),
            Some(previous) => (previous.train_ref(), false),
            None => (branch_ref_path(&car.target_branch), true),
        };

        match self.ref_builder.resolve(car.project_id, &ref_name).await? {
            Some(sha) => Ok(Predecessor::Ready {
                previous: PreviousRef { name: ref_name, sha },
                is_head,
            }),
            None => Ok(Predecessor::Missing { ref_name }),
        }
    }

    /// Returns true if the rebuild policy asks for a rebuild on its own.
    fn policy_rebuild(&self, car: &Car, pipeline: Option<&Pipeline>, is_head: bool) -> bool {
        match self.config.rebuild_policy {
            RebuildPolicy::ReuseWhenFresh => false,
            RebuildPolicy::AlwaysRebuild => {
                let active = pipeline.is_some_and(|p| p.status.is_active());
                !active && !car.is_mergeable(pipeline, is_head)
            }
        }
    }

    async fn rebuild(&self, car: Car, merge_request: &MergeRequest, previous: &PreviousRef, force: bool) -> Result<Rebuild> {
        let build = match self.ref_builder.build(&car, merge_request, previous, force).await {
            Ok(build) => build,
            Err(RefBuildError::Conflict { details }) => {
                let outcome = self
                    .abort(car, merge_request, AbortReason::RefConflict { details })
                    .await?;
                return Ok(Rebuild::Finished(outcome));
            }
            Err(RefBuildError::PreviousRefMissing { ref_name }) => {
                let outcome = self
                    .abort(car, merge_request, AbortReason::PreviousRefMissing { ref_name })
                    .await?;
                return Ok(Rebuild::Finished(outcome));
            }
            Err(RefBuildError::Service(e)) => return Err(e.into()),
        };

        let pipeline = match self.trigger
            .trigger(&car, merge_request, &build, &previous.sha)
            .await {
            Ok(pipeline) => pipeline,
            Err(PipelineTriggerError::Rejected { details }) => {
                let outcome = self
                    .abort(car, merge_request, AbortReason::PipelineCreationFailed { details })
                    .await?;
                return Ok(Rebuild::Finished(outcome));
            }
            Err(PipelineTriggerError::Service(e)) => return Err(e.into()),
        };

        let pipeline_id = pipeline.id;
        let previous_sha = previous.sha.clone();
        let source_sha = merge_request.diff_head_sha.clone();
        let recorded = self
            .store
            .update(car.merge_request_id, car.lock_version, move |c| {
                c.refresh_pipeline(pipeline_id, build, previous_sha, source_sha)
            })
            .await;

        match recorded {
            Ok(car) => Ok(Rebuild::Recorded { car, pipeline }),
            Err(StoreError::StaleObject { .. } | StoreError::Transition(_) | StoreError::NotOnTrain { .. }) => {
                info!(pipeline = %pipeline_id, "car changed while building; canceling new pipeline");
                self.trigger.cancel(pipeline_id, None).await;
                Ok(Rebuild::Finished(RefreshOutcome::ConcurrentUpdate))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn merge(&self, car: Car, merge_request: &MergeRequest, passed: &Pipeline) -> Result<RefreshOutcome> {
        let merging = match self
            .store
            .update(car.merge_request_id, car.lock_version, |c| c.start_merge(passed))
            .await
        {
            Ok(merging) => merging,
            Err(StoreError::StaleObject { .. } | StoreError::Transition(_)) => {
                debug!("another worker started the merge");
                return Ok(RefreshOutcome::MergeInProgress);
            }
            Err(StoreError::NotOnTrain { .. }) => return Ok(RefreshOutcome::ConcurrentUpdate),
            Err(e) => return Err(e.into()),
        };

        match self.merger.merge(&merging, merge_request).await {
            Ok(sha) => self.finish(merging, merge_request, sha).await,
            Err(CarMergeError::Service(e)) => {
                if let Err(release) = self
                    .store
                    .update(merging.merge_request_id, merging.lock_version, Car::cancel_merge)
                    .await
                {
                    error!(error = %release, "failed to release merge after service error");
                }
                Err(e.into())
            }
            Err(e) => {
                let reason = AbortReason::MergeFailed {
                    details: e.to_string(),
                };
                self.abort(merging, merge_request, reason).await
            }
        }
    }

    async fn finish(&self, car: Car, merge_request: &MergeRequest, sha: Sha) -> Result<RefreshOutcome> {
        let merged_sha = sha.clone();
        let merged = self
            .store
            .update(car.merge_request_id, car.lock_version, move |c| c.finish_merge(merged_sha))
            .await?;
        self.store
            .dequeue(merged.merge_request_id, DequeueCause::Merged)
            .await?;
        self.ref_builder.cleanup(&merged).await;
        self.notifier.car_merged(merge_request, &sha);

        info!(
            train = %merged.train_key(),
            sha = %sha.short(),
            "car merged"
        );
        Ok(RefreshOutcome::Merged { sha })
    }

    async fn abort(&self, car: Car, merge_request: &MergeRequest, reason: AbortReason) -> Result<RefreshOutcome> {
        let removed = self
            .store
            .dequeue(car.merge_request_id, DequeueCause::Aborted)
            .await?;

        let mut car = car;
        if let Err(e) = car.abort() {
            debug!(error = %e, "car was already finished");
        }
        self.teardown(&car).await;

        if removed.is_some() {
            self.notifier.car_aborted(merge_request, &reason);
        }

        if reason.is_severe() {
            error!(
                train = %car.train_key(),
                error_type = reason.error_type(),
                "car aborted: {}",
                reason.description()
            );
        } else {
            warn!(
                train = %car.train_key(),
                error_type = reason.error_type(),
                "car aborted: {}",
                reason.description()
            );
        }
        Ok(RefreshOutcome::Aborted { reason })
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
