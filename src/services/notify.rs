//! Author notifications and project policy.
//!
//! Both are synchronous hooks: the surrounding system decides how to deliver
//! a notification (system note, email) or where a project's setting lives.

use std::collections::HashSet;

use tracing::info;

use crate::types::{AbortReason, MergeRequest, ProjectId, Sha};

/// Receives the end of every car's journey.
pub trait TrainNotifier: Send + Sync {
    /// A car was aborted. Implementations should tell the author and cancel
    /// auto-merge on the merge request.
    fn car_aborted(&self, merge_request: &MergeRequest, reason: &AbortReason);

    fn car_merged(&self, merge_request: &MergeRequest, merge_commit_sha: &Sha);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl TrainNotifier for LogNotifier {
    fn car_aborted(&self, merge_request: &MergeRequest, reason: &AbortReason) {
        info!(
            merge_request = %merge_request.id,
            author = %merge_request.author,
            error_type = reason.error_type(),
            "removed from merge train: {}",
            reason.description()
        );
    }

    fn car_merged(&self, merge_request: &MergeRequest, merge_commit_sha: &Sha) {
        info!(
            merge_request = %merge_request.id,
            sha = %merge_commit_sha.short(),
            "merged by merge train"
        );
    }
}

/// Decides whether a project may use merge trains.
pub trait PolicyChecker: Send + Sync {
    fn merge_trains_enabled(&self, project: ProjectId) -> bool;
}

/// Policy backed by configuration: a global switch plus a deny list.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicy {
    enabled: bool,
    disabled_projects: HashSet<ProjectId>,
}

impl StaticPolicy {
    pub fn new(enabled: bool) -> Self {
        StaticPolicy {
            enabled,
            disabled_projects: HashSet::new(),
        }
    }

    /// Disables merge trains for one project.
    pub fn disable(mut self, project: ProjectId) -> Self {
        self.disabled_projects.insert(project);
        self
    }
}

impl PolicyChecker for StaticPolicy {
    fn merge_trains_enabled(&self, project: ProjectId) -> bool {
        self.enabled && !self.disabled_projects.contains(&project)
    }
}
