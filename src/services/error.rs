//! Collaborator error types.
//!
//! Collaborators fail in two ways. Domain failures (a conflict, a rejected
//! pipeline, a merge that did not land) have their own variants and are turned
//! into abort reasons by the orchestrator. Everything else is a
//! [`ServiceError`], classified for retry decisions:
//!
//! - **Transient** errors are retriable (timeouts, 5xx, lock contention)
//! - **Permanent** errors need a human (auth failures, misconfiguration)

use std::fmt;
use thiserror::Error;

use crate::types::PipelineId;

/// The kind of service error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Safe to retry with backoff.
    Transient,
    /// Retrying will not help.
    Permanent,
}

impl ServiceErrorKind {
    /// Returns true if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ServiceErrorKind::Transient)
    }
}

/// An infrastructure failure talking to a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    /// Which collaborator failed (`"git"`, `"ci"`, `"merge"`).
    pub service: &'static str,
    pub message: String,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ServiceErrorKind::Transient => "transient",
            ServiceErrorKind::Permanent => "permanent",
        };
        write!(f, "{} {} error: {}", self.service, kind, self.message)
    }
}

impl ServiceError {
    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError {
            kind: ServiceErrorKind::Transient,
            service,
            message: message.into(),
        }
    }

    pub fn permanent(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError {
            kind: ServiceErrorKind::Permanent,
            service,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_retriable()
    }
}

/// Failure writing a train ref.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateRefError {
    /// The source does not merge cleanly onto the base.
    #[error("merge conflict: {details}")]
    Conflict { details: String },

    /// The base ref does not exist or moved away from the expected sha.
    #[error("base ref {ref_name} is missing")]
    BaseRefMissing { ref_name: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Failure creating a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreatePipelineError {
    /// CI refused the pipeline (invalid config, no runnable jobs, quota).
    #[error("pipeline rejected: {details}")]
    Rejected { details: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Failure cancelling a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelPipelineError {
    /// The pipeline already finished. Cancellation races are expected.
    #[error("pipeline {0} already finished")]
    AlreadyTerminal(PipelineId),

    #[error("pipeline {0} not found")]
    NotFound(PipelineId),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Failure executing a merge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// The merge was attempted and refused (guard mismatch, conflict).
    #[error("merge failed: {details}")]
    Failed { details: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_service_and_kind() {
        let err = ServiceError::transient("ci", "timed out");
        assert_eq!(err.to_string(), "ci transient error: timed out");
        assert!(err.is_transient());
        assert!(!ServiceError::permanent("git", "forbidden").is_transient());
    }

    #[test]
    fn service_errors_pass_through_domain_enums() {
        let err: CreateRefError = ServiceError::permanent("git", "forbidden").into();
        assert_eq!(err.to_string(), "git permanent error: forbidden");
    }
}
