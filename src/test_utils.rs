//! Shared test fixtures and in-memory collaborators.
//!
//! Every fake yields to the scheduler once per call so concurrent refreshes
//! in tests interleave at the same await points real clients would.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::services::{
    CancelPipelineError, CreatePipelineError, CreatePipelineRequest, CreateRefError,
    CreateRefRequest, MergeError, MergeExecution, MergeResult, MergeService, PipelineService,
    RefService, ServiceError, TrainNotifier,
};
use crate::types::{
    AbortReason, Car, MergeRequest, MergeRequestId, MergeRequestState, Pipeline, PipelineId,
    PipelineStatus, ProjectId, RefBuildResult, Sha, UserId, branch_ref_path,
};

/// Builds a deterministic 40-character sha from a number.
pub fn make_sha(n: u64) -> Sha {
    Sha::new(format!("{:0>40x}", n))
}

/// Builds an open, auto-merging merge request in project 1.
pub fn make_mr(id: u64, target_branch: &str) -> MergeRequest {
    MergeRequest {
        id: MergeRequestId(id),
        project: ProjectId(1),
        title: format!("Change {}", id),
        source_branch: format!("feature-{}", id),
        target_branch: target_branch.to_string(),
        diff_head_sha: make_sha(0x5000 + id),
        state: MergeRequestState::Opened,
        draft: false,
        broken: false,
        auto_merge_enabled: true,
        squash: false,
        author: UserId(id),
    }
}

/// A car of `make_mr(id, target_branch)` whose pipeline passed, and that
/// pipeline. Ready for `start_merge`.
pub fn tested_car(id: u64, target_branch: &str) -> (Car, Pipeline) {
    let merge_request = make_mr(id, target_branch);
    let mut car = Car::new(&merge_request, UserId(1));
    let build = RefBuildResult {
        commit_sha: make_sha(0x3000 + id),
        merge_commit_sha: make_sha(0x3000 + id),
        squash_commit_sha: None,
    };
    let pipeline = Pipeline {
        id: PipelineId(1000 + id),
        ref_name: car.train_ref(),
        sha: build.commit_sha.clone(),
        status: PipelineStatus::Success,
    };
    car.refresh_pipeline(pipeline.id, build, make_sha(1), merge_request.diff_head_sha)
        .expect("new car accepts a pipeline");
    (car, pipeline)
}

async fn yield_now() {
    tokio::task::yield_now().await;
}

// ─── Git ───

#[derive(Debug, Default)]
struct GitState {
    refs: HashMap<String, Sha>,
    conflicting_sources: HashSet<Sha>,
    next_commit: u64,
    created: Vec<CreateRefRequest>,
    deleted: Vec<String>,
    fail_create: Option<ServiceError>,
    fail_delete: Option<ServiceError>,
}

/// In-memory repository refs.
#[derive(Debug, Default)]
pub struct FakeGit {
    state: Mutex<GitState>,
}

impl FakeGit {
    pub fn new() -> Self {
        let git = Self::default();
        git.state.lock().unwrap().next_commit = 0x10_000;
        git
    }

    /// Points a branch at a sha.
    pub fn set_branch(&self, branch: &str, sha: Sha) {
        self.set_ref(&branch_ref_path(branch), sha);
    }

    pub fn set_ref(&self, name: &str, sha: Sha) {
        self.state.lock().unwrap().refs.insert(name.to_string(), sha);
    }

    pub fn remove_ref(&self, name: &str) {
        self.state.lock().unwrap().refs.remove(name);
    }

    pub fn ref_sha(&self, name: &str) -> Option<Sha> {
        self.state.lock().unwrap().refs.get(name).cloned()
    }

    pub fn branch_sha(&self, branch: &str) -> Option<Sha> {
        self.ref_sha(&branch_ref_path(branch))
    }

    /// Makes every merge of this source sha conflict.
    pub fn conflict_on(&self, source_sha: Sha) {
        self.state.lock().unwrap().conflicting_sources.insert(source_sha);
    }

    pub fn fail_next_create(&self, error: ServiceError) {
        self.state.lock().unwrap().fail_create = Some(error);
    }

    pub fn fail_next_delete(&self, error: ServiceError) {
        self.state.lock().unwrap().fail_delete = Some(error);
    }

    pub fn created(&self) -> Vec<CreateRefRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

impl RefService for FakeGit {
    async fn resolve_ref(&self, _project: ProjectId, ref_name: &str) -> Result<Option<Sha>, ServiceError> {
        yield_now().await;
        Ok(self.ref_sha(ref_name))
    }

    async fn create_ref(&self, request: CreateRefRequest) -> Result<RefBuildResult, CreateRefError> {
        yield_now().await;
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_create.take() {
            return Err(error.into());
        }
        state.created.push(request.clone());

        if state.refs.get(&request.base_ref) != Some(&request.base_sha) {
            return Err(CreateRefError::BaseRefMissing {
                ref_name: request.base_ref,
            });
        }
        if state.conflicting_sources.contains(&request.source_sha) {
            return Err(CreateRefError::Conflict {
                details: format!("{} conflicts with {}", request.source_sha.short(), request.base_ref),
            });
        }

        state.next_commit += 1;
        let squash_commit_sha = request.squash_commit_message.as_ref().map(|_| {
            state.next_commit += 1;
            make_sha(state.next_commit - 1)
        });
        let commit_sha = make_sha(state.next_commit);
        state.refs.insert(request.target_ref, commit_sha.clone());

        Ok(RefBuildResult {
            merge_commit_sha: commit_sha.clone(),
            commit_sha,
            squash_commit_sha,
        })
    }

    async fn delete_ref(&self, _project: ProjectId, ref_name: &str) -> Result<(), ServiceError> {
        yield_now().await;
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_delete.take() {
            return Err(error);
        }
        state.refs.remove(ref_name);
        state.deleted.push(ref_name.to_string());
        Ok(())
    }
}

// ─── CI ───

#[derive(Debug, Default)]
struct CiState {
    pipelines: HashMap<PipelineId, Pipeline>,
    next_id: u64,
    initial_status: Option<PipelineStatus>,
    created: Vec<CreatePipelineRequest>,
    canceled: Vec<PipelineId>,
    reject_next: Option<String>,
    fail_create: Option<ServiceError>,
    fail_find: Option<ServiceError>,
    fail_cancel: Option<ServiceError>,
}

/// In-memory CI system.
#[derive(Debug, Default)]
pub struct FakeCi {
    state: Mutex<CiState>,
}

impl FakeCi {
    pub fn new() -> Self {
        let ci = Self::default();
        ci.state.lock().unwrap().next_id = 100;
        ci
    }

    /// Creates new pipelines in `status` instead of `Created`.
    pub fn create_with_status(&self, status: PipelineStatus) {
        self.state.lock().unwrap().initial_status = Some(status);
    }

    pub fn set_status(&self, id: PipelineId, status: PipelineStatus) {
        if let Some(pipeline) = self.state.lock().unwrap().pipelines.get_mut(&id) {
            pipeline.status = status;
        }
    }

    /// Forgets a pipeline, as if CI purged it.
    pub fn forget(&self, id: PipelineId) {
        self.state.lock().unwrap().pipelines.remove(&id);
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<Pipeline> {
        self.state.lock().unwrap().pipelines.get(&id).cloned()
    }

    pub fn reject_next(&self, details: &str) {
        self.state.lock().unwrap().reject_next = Some(details.to_string());
    }

    pub fn fail_next_create(&self, error: ServiceError) {
        self.state.lock().unwrap().fail_create = Some(error);
    }

    pub fn fail_next_find(&self, error: ServiceError) {
        self.state.lock().unwrap().fail_find = Some(error);
    }

    pub fn fail_next_cancel(&self, error: ServiceError) {
        self.state.lock().unwrap().fail_cancel = Some(error);
    }

    pub fn created(&self) -> Vec<CreatePipelineRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn canceled(&self) -> Vec<PipelineId> {
        self.state.lock().unwrap().canceled.clone()
    }
}

impl PipelineService for FakeCi {
    async fn create_pipeline(&self, request: CreatePipelineRequest) -> Result<Pipeline, CreatePipelineError> {
        yield_now().await;
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_create.take() {
            return Err(error.into());
        }
        if let Some(details) = state.reject_next.take() {
            return Err(CreatePipelineError::Rejected { details });
        }

        state.next_id += 1;
        let pipeline = Pipeline {
            id: PipelineId(state.next_id),
            ref_name: request.ref_name.clone(),
            sha: request.sha.clone(),
            status: state.initial_status.unwrap_or(PipelineStatus::Created),
        };
        state.pipelines.insert(pipeline.id, pipeline.clone());
        state.created.push(request);
        Ok(pipeline)
    }

    async fn find_pipeline(&self, id: PipelineId) -> Result<Option<Pipeline>, ServiceError> {
        yield_now().await;
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_find.take() {
            return Err(error);
        }
        Ok(state.pipelines.get(&id).cloned())
    }

    async fn cancel_pipeline(&self, id: PipelineId, _superseded_by: Option<PipelineId>) -> Result<(), CancelPipelineError> {
        yield_now().await;
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_cancel.take() {
            return Err(error.into());
        }
        let pipeline = state
            .pipelines
            .get_mut(&id)
            .ok_or(CancelPipelineError::NotFound(id))?;
        if pipeline.status.is_complete() {
            return Err(CancelPipelineError::AlreadyTerminal(id));
        }
        pipeline.status = PipelineStatus::Canceled;
        state.canceled.push(id);
        Ok(())
    }
}

// ─── Merge ───

#[derive(Debug, Default)]
struct MergeState {
    executions: Vec<MergeExecution>,
    fail_next: Option<MergeError>,
    report_not_merged: bool,
    rewrite_commits: bool,
    next_commit: u64,
}

/// Merges by moving the target branch of a [`FakeGit`] to the tested commit.
#[derive(Debug)]
pub struct FakeMerger {
    git: Arc<FakeGit>,
    state: Mutex<MergeState>,
}

impl FakeMerger {
    pub fn new(git: Arc<FakeGit>) -> Self {
        FakeMerger {
            git,
            state: Mutex::new(MergeState::default()),
        }
    }

    pub fn fail_next(&self, error: MergeError) {
        self.state.lock().unwrap().fail_next = Some(error);
    }

    /// Makes the next merge return without merging.
    pub fn report_not_merged(&self) {
        self.state.lock().unwrap().report_not_merged = true;
    }

    /// Lands a fresh commit on the target branch instead of the tested one,
    /// as a merge service that recreates the merge commit would.
    pub fn rewrite_commits(&self) {
        self.state.lock().unwrap().rewrite_commits = true;
    }

    pub fn executions(&self) -> Vec<MergeExecution> {
        self.state.lock().unwrap().executions.clone()
    }

    pub fn merged(&self) -> Vec<MergeRequestId> {
        self.executions().iter().map(|e| e.merge_request).collect()
    }
}

impl MergeService for FakeMerger {
    async fn merge(&self, execution: MergeExecution) -> Result<MergeResult, MergeError> {
        yield_now().await;
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        if std::mem::take(&mut state.report_not_merged) {
            return Ok(MergeResult {
                merged: false,
                merge_commit_sha: None,
            });
        }

        let sha = if state.rewrite_commits {
            state.next_commit += 1;
            make_sha(0x20_000 + state.next_commit)
        } else {
            execution.train_commit_sha.clone()
        };
        self.git.set_branch(&execution.target_branch, sha.clone());
        state.executions.push(execution);
        Ok(MergeResult {
            merged: true,
            merge_commit_sha: Some(sha),
        })
    }
}

// ─── Notifications ───

/// A notification received by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Aborted(MergeRequestId, AbortReason),
    Merged(MergeRequestId, Sha),
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn aborted(&self) -> Vec<(MergeRequestId, AbortReason)> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Aborted(id, reason) => Some((id, reason)),
                Notification::Merged(..) => None,
            })
            .collect()
    }
}

impl TrainNotifier for RecordingNotifier {
    fn car_aborted(&self, merge_request: &MergeRequest, reason: &AbortReason) {
        self.notifications
            .lock()
            .unwrap()
            .push(Notification::Aborted(merge_request.id, reason.clone()));
    }

    fn car_merged(&self, merge_request: &MergeRequest, merge_commit_sha: &Sha) {
        self.notifications
            .lock()
            .unwrap()
            .push(Notification::Merged(merge_request.id, merge_commit_sha.clone()));
    }
}
