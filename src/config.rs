//! Engine configuration.
//!
//! Configuration is resolved once (usually with [`TrainConfig::from_env`]) and
//! handed to the orchestrator and service at construction. Nothing reads the
//! environment after startup.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default number of cars per train that may hold a pipeline at once.
const DEFAULT_MAX_CONCURRENCY: usize = 20;

/// How the head car lands on the target branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    /// Create a merge commit on the target branch.
    #[default]
    MergeCommit,
    /// Move the target branch to the tested train commit.
    FastForward,
}

impl FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" | "merge_commit" => Ok(MergeMethod::MergeCommit),
            "ff" | "fast_forward" => Ok(MergeMethod::FastForward),
            other => Err(format!("unknown merge method: {}", other)),
        }
    }
}

/// When an idle car's train ref is rebuilt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPolicy {
    /// Rebuild only when the predecessor or the source moved.
    #[default]
    ReuseWhenFresh,
    /// Rebuild on every refresh until the car is mergeable.
    AlwaysRebuild,
}

impl FromStr for RebuildPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse" | "reuse_when_fresh" => Ok(RebuildPolicy::ReuseWhenFresh),
            "always" | "always_rebuild" => Ok(RebuildPolicy::AlwaysRebuild),
            other => Err(format!("unknown rebuild policy: {}", other)),
        }
    }
}

/// Configuration for the train engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Global feature flag. Per-project checks go through a `PolicyChecker`.
    ///
    /// Default: enabled. Configure via `MERGE_TRAINS_ENABLED`.
    pub enabled: bool,

    /// Only the first N cars of a train may hold a pipeline.
    ///
    /// Default: 20. Configure via `MERGE_TRAINS_MAX_CONCURRENCY`.
    pub max_concurrency: usize,

    /// Default: merge commit. Configure via `MERGE_TRAINS_MERGE_METHOD`.
    pub merge_method: MergeMethod,

    /// Default: reuse when fresh. Configure via `MERGE_TRAINS_REBUILD_POLICY`.
    pub rebuild_policy: RebuildPolicy,

    /// Cancel a car's old pipeline when a rebuild supersedes it.
    pub cancel_superseded_pipelines: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainConfig {
    /// Creates a new `TrainConfig` with default values.
    pub fn new() -> Self {
        TrainConfig {
            enabled: true,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            merge_method: MergeMethod::default(),
            rebuild_policy: RebuildPolicy::default(),
            cancel_superseded_pipelines: true,
        }
    }

    /// Creates a `TrainConfig` from environment variables.
    ///
    /// Unset or unparseable values use defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new();

        let enabled = lookup("MERGE_TRAINS_ENABLED")
            .and_then(|s| parse_bool(&s))
            .unwrap_or(defaults.enabled);

        let max_concurrency = lookup("MERGE_TRAINS_MAX_CONCURRENCY")
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_concurrency);

        let merge_method = lookup("MERGE_TRAINS_MERGE_METHOD")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.merge_method);

        let rebuild_policy = lookup("MERGE_TRAINS_REBUILD_POLICY")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.rebuild_policy);

        TrainConfig {
            enabled,
            max_concurrency,
            merge_method,
            rebuild_policy,
            ..defaults
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = TrainConfig::new();
        assert!(config.enabled);
        assert_eq!(config.max_concurrency, 20);
        assert_eq!(config.merge_method, MergeMethod::MergeCommit);
        assert_eq!(config.rebuild_policy, RebuildPolicy::ReuseWhenFresh);
        assert!(config.cancel_superseded_pipelines);
    }

    #[test]
    fn reads_all_variables() {
        let config = TrainConfig::from_lookup(lookup(&[
            ("MERGE_TRAINS_ENABLED", "false"),
            ("MERGE_TRAINS_MAX_CONCURRENCY", "4"),
            ("MERGE_TRAINS_MERGE_METHOD", "fast_forward"),
            ("MERGE_TRAINS_REBUILD_POLICY", "always"),
        ]));
        assert!(!config.enabled);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.merge_method, MergeMethod::FastForward);
        assert_eq!(config.rebuild_policy, RebuildPolicy::AlwaysRebuild);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = TrainConfig::from_lookup(lookup(&[
            ("MERGE_TRAINS_ENABLED", "maybe"),
            ("MERGE_TRAINS_MAX_CONCURRENCY", "0"),
            ("MERGE_TRAINS_MERGE_METHOD", "rebase"),
        ]));
        assert_eq!(config, TrainConfig::new());
    }
}
