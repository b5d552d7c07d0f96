//! Merge request snapshots.
//!
//! The engine never loads merge requests itself. Callers hand it a snapshot
//! that is kept current from push, pipeline and merge-request events.

use serde::{Deserialize, Serialize};

use super::ids::{MergeRequestId, ProjectId, Sha, TrainKey, UserId};

/// The state of a merge request.
///
/// `Merged` carries the merge commit because a merged request always has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeRequestState {
    Opened,
    Closed,
    /// Locked while the surrounding system is mid-merge.
    Locked,
    Merged {
        merge_commit_sha: Sha,
    },
}

impl MergeRequestState {
    /// Returns true if the merge request is open.
    pub fn is_open(&self) -> bool {
        matches!(self, MergeRequestState::Opened)
    }

    /// Returns true if the merge request was merged.
    pub fn is_merged(&self) -> bool {
        matches!(self, MergeRequestState::Merged { .. })
    }

    /// Returns the state name for messages.
    pub fn name(&self) -> &'static str {
        match self {
            MergeRequestState::Opened => "opened",
            MergeRequestState::Closed => "closed",
            MergeRequestState::Locked => "locked",
            MergeRequestState::Merged { .. } => "merged",
        }
    }
}

/// A merge request as seen by the train engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: MergeRequestId,
    pub project: ProjectId,
    pub title: String,
    pub source_branch: String,
    pub target_branch: String,
    /// The head of the source branch.
    pub diff_head_sha: Sha,
    pub state: MergeRequestState,
    pub draft: bool,
    /// The source branch is gone or the diff cannot be computed.
    pub broken: bool,
    /// Auto-merge (merge when the train pipeline succeeds) is requested.
    pub auto_merge_enabled: bool,
    /// Squash the source commits when merging.
    pub squash: bool,
    pub author: UserId,
}

impl MergeRequest {
    /// Returns the key of the train this merge request would ride.
    pub fn train_key(&self) -> TrainKey {
        TrainKey::new(self.project, self.target_branch.clone())
    }

    /// Returns the merge commit message used for train refs and the final merge.
    pub fn merge_commit_message(&self) -> String {
        format!(
            "Merge branch '{}' into '{}'\n\n{}\n\nSee merge request {}",
            self.source_branch, self.target_branch, self.title, self.id
        )
    }

    /// Returns the squash commit message, if squashing is requested.
    pub fn squash_commit_message(&self) -> Option<String> {
        self.squash.then(|| self.title.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MergeRequest {
        MergeRequest {
            id: MergeRequestId(12),
            project: ProjectId(1),
            title: "Add caching".to_string(),
            source_branch: "feature/cache".to_string(),
            target_branch: "main".to_string(),
            diff_head_sha: Sha::new("a".repeat(40)),
            state: MergeRequestState::Opened,
            draft: false,
            broken: false,
            auto_merge_enabled: true,
            squash: false,
            author: UserId(5),
        }
    }

    #[test]
    fn merge_commit_message_names_branches_and_request() {
        let message = sample().merge_commit_message();
        assert_eq!(
            message,
            "Merge branch 'feature/cache' into 'main'\n\nAdd caching\n\nSee merge request !12"
        );
    }

    #[test]
    fn squash_message_only_when_squashing() {
        let mut mr = sample();
        assert_eq!(mr.squash_commit_message(), None);
        mr.squash = true;
        assert_eq!(mr.squash_commit_message().as_deref(), Some("Add caching"));
    }

    #[test]
    fn state_predicates() {
        assert!(MergeRequestState::Opened.is_open());
        assert!(!MergeRequestState::Closed.is_open());
        assert!(!MergeRequestState::Locked.is_open());
        let merged = MergeRequestState::Merged {
            merge_commit_sha: Sha::new("b".repeat(40)),
        };
        assert!(merged.is_merged());
        assert_eq!(merged.name(), "merged");
    }

    #[test]
    fn state_serde_is_tagged() {
        let json = serde_json::to_value(MergeRequestState::Closed).unwrap();
        assert_eq!(json, serde_json::json!({"status": "closed"}));
    }
}
