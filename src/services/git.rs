//! Repository ref operations.

use std::future::Future;

use super::error::{CreateRefError, ServiceError};
use crate::types::{ProjectId, RefBuildResult, Sha};

/// Request to write a synthetic merge commit to a train ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRefRequest {
    pub project: ProjectId,
    /// The ref to (over)write, e.g. `refs/merge-requests/7/train`.
    pub target_ref: String,
    /// The ref the merge is based on: the predecessor's train ref or the
    /// target branch.
    pub base_ref: String,
    /// The sha `base_ref` is expected to point at.
    pub base_sha: Sha,
    /// The merge request head to merge in.
    pub source_sha: Sha,
    pub merge_commit_message: String,
    /// Squash the source commits first, with this message.
    pub squash_commit_message: Option<String>,
}

/// Reads and writes refs in the project repository.
///
/// Writes must be atomic overwrites so a retried request is idempotent.
pub trait RefService {
    /// Returns the sha a ref points at, or `None` if it does not exist.
    fn resolve_ref(
        &self,
        project: ProjectId,
        ref_name: &str,
    ) -> impl Future<Output = Result<Option<Sha>, ServiceError>> + Send;

    /// Merges `source_sha` onto `base_sha` and points `target_ref` at the result.
    fn create_ref(
        &self,
        request: CreateRefRequest,
    ) -> impl Future<Output = Result<RefBuildResult, CreateRefError>> + Send;

    /// Deletes a ref. Deleting a missing ref is not an error.
    fn delete_ref(
        &self,
        project: ProjectId,
        ref_name: &str,
    ) -> impl Future<Output = Result<(), ServiceError>> + Send;
}
