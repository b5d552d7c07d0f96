//! Merge execution.

use std::future::Future;

use super::error::MergeError;
use crate::config::MergeMethod;
use crate::types::{MergeRequestId, ProjectId, Sha};

/// Everything needed to land the head car on its target branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeExecution {
    pub project: ProjectId,
    pub merge_request: MergeRequestId,
    pub target_branch: String,
    pub method: MergeMethod,
    /// Refuse the merge if the source moved past this sha.
    pub expected_source_sha: Sha,
    /// The tested train commit. Fast-forward merges move the branch here.
    pub train_commit_sha: Sha,
    /// The tested merge commit (before any squash).
    pub merge_commit_sha: Sha,
    pub squash_commit_sha: Option<Sha>,
    pub commit_message: String,
}

/// What the merge collaborator reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Whether the merge request ended up merged.
    pub merged: bool,
    /// The new tip of the target branch.
    pub merge_commit_sha: Option<Sha>,
}

/// Lands a merge request on its target branch.
pub trait MergeService {
    fn merge(
        &self,
        execution: MergeExecution,
    ) -> impl Future<Output = Result<MergeResult, MergeError>> + Send;
}
