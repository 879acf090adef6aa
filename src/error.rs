//! Error types for plan building, retry and rollback

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by the plan/retry/rollback transformations
///
/// Every transformation either returns a complete result or one of these;
/// none of them leaves a partially rewritten document or plan behind.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The prior execution cannot be retried (skeleton mismatch or failed precondition)
    #[error("Execution cannot be retried: {0}")]
    NotRetryable(String),

    /// The requested retry stages are unknown or leave nothing to execute
    #[error("Invalid retry selection: {0}")]
    InvalidRetrySelection(String),

    /// The prior execution's recorded document cannot be used for rollback
    #[error("Execution cannot be rolled back: {0}")]
    NotRollbackable(String),

    /// The rollback filter matched no stage of the prior execution
    #[error("Rollback selection is empty: {0}")]
    EmptySelection(String),

    /// A run was requested for a pipeline that is only saved as a draft
    #[error("Pipeline '{0}' is a draft and cannot be executed")]
    DraftPipeline(String),

    /// An identity node could not be bound to a prior node execution
    #[error("No prior execution found for node '{identifier}' of stage '{stage_fqn}'")]
    MissingHistoryReference {
        identifier: String,
        stage_fqn: String,
    },

    /// The pipeline document is structurally invalid
    #[error("Invalid pipeline document: {0}")]
    InvalidDocument(String),

    /// The static reference validator found unresolved references
    #[error("Unresolved references in pipeline: {}", .0.join(", "))]
    UnresolvedReferences(Vec<String>),

    /// Runtime inputs could not be merged into the pipeline document
    #[error("Failed to merge runtime inputs: {0}")]
    InputMerge(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Stable, introspectable classification of a [`PlanError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotRetryable,
    InvalidRetrySelection,
    NotRollbackable,
    EmptySelection,
    DraftPipeline,
    MissingHistoryReference,
    InvalidDocument,
    UnresolvedReferences,
    InputMerge,
}

impl ErrorKind {
    /// Upper-snake code used when translating into a transport error
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotRetryable => "NOT_RETRYABLE",
            ErrorKind::InvalidRetrySelection => "INVALID_RETRY_SELECTION",
            ErrorKind::NotRollbackable => "NOT_ROLLBACKABLE",
            ErrorKind::EmptySelection => "EMPTY_SELECTION",
            ErrorKind::DraftPipeline => "DRAFT_PIPELINE",
            ErrorKind::MissingHistoryReference => "MISSING_HISTORY_REFERENCE",
            ErrorKind::InvalidDocument => "INVALID_DOCUMENT",
            ErrorKind::UnresolvedReferences => "UNRESOLVED_REFERENCES",
            ErrorKind::InputMerge => "INPUT_MERGE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl PlanError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::NotRetryable(_) => ErrorKind::NotRetryable,
            PlanError::InvalidRetrySelection(_) => ErrorKind::InvalidRetrySelection,
            PlanError::NotRollbackable(_) => ErrorKind::NotRollbackable,
            PlanError::EmptySelection(_) => ErrorKind::EmptySelection,
            PlanError::DraftPipeline(_) => ErrorKind::DraftPipeline,
            PlanError::MissingHistoryReference { .. } => ErrorKind::MissingHistoryReference,
            PlanError::InvalidDocument(_) | PlanError::Yaml(_) => ErrorKind::InvalidDocument,
            PlanError::UnresolvedReferences(_) => ErrorKind::UnresolvedReferences,
            PlanError::InputMerge(_) => ErrorKind::InputMerge,
        }
    }
}
