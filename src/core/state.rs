//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a pipeline, stage or node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Never reached
    NotStarted,
    /// Waiting for a slot to run
    Queued,
    /// Currently running
    Running,
    /// Finished successfully
    Success,
    /// Failed, but the failure was configured to be ignored
    IgnoreFailed,
    /// Failed
    Failed,
    /// Aborted by a user or a timeout
    Aborted,
    /// Timed out while waiting (e.g. an approval)
    Expired,
    /// An approval was rejected
    ApprovalRejected,
    /// Skipped by a condition
    Skipped,
}

impl ExecutionStatus {
    /// Statuses that make a stage eligible for a retry
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Failed
                | ExecutionStatus::Aborted
                | ExecutionStatus::Expired
                | ExecutionStatus::ApprovalRejected
        )
    }

    /// Statuses whose result can be reused
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::IgnoreFailed)
    }

    /// Whether the stage actually ran as part of the execution
    pub fn has_run(&self) -> bool {
        !matches!(
            self,
            ExecutionStatus::NotStarted | ExecutionStatus::Queued | ExecutionStatus::Skipped
        )
    }
}

/// One historical stage execution, as recorded by the history store
///
/// `origin_id` is shared by stages that started from the same predecessor,
/// so consecutive records with the same origin ran in parallel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    /// Stage identifier
    pub identifier: String,

    /// Stage display name
    pub display_name: String,

    /// Link shared by parallel siblings
    pub origin_id: String,

    /// Identifier of the stage that followed
    #[serde(default)]
    pub next_id: Option<String>,

    /// Final (or current) status
    pub status: ExecutionStatus,

    /// When the stage started
    pub started_at: DateTime<Utc>,
}

/// Execution mode of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// A regular run
    Normal,
    /// A retry of a failed execution
    Rerun,
    /// Rollback of selected stages after the execution finished
    PostExecutionRollback,
    /// Rollback of the whole pipeline
    PipelineRollback,
}

impl ExecutionMode {
    /// Whether the mode replays a prior execution in reverse
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            ExecutionMode::PostExecutionRollback | ExecutionMode::PipelineRollback
        )
    }
}

/// How a run was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Manual,
    Webhook,
    Scheduled,
}

/// Who and what triggered a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    /// Trigger kind
    pub trigger_type: TriggerType,

    /// User or trigger identifier that started the run
    pub triggered_by: String,
}

impl TriggerInfo {
    /// A run started by hand
    pub fn manual(triggered_by: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            triggered_by: triggered_by.into(),
        }
    }
}

/// Link from a retry or rollback run to the execution it replays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerunInfo {
    /// First execution of the retry chain
    pub root_execution_id: Uuid,

    /// Execution this run replays
    pub previous_execution_id: Uuid,
}

/// Per-attempt execution metadata; immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    /// Unique execution ID, fresh for every attempt
    pub execution_id: Uuid,

    /// Pipeline this execution belongs to
    pub pipeline_identifier: String,

    /// Trigger of this attempt
    pub trigger_info: TriggerInfo,

    /// Run number assigned by the embedding system
    pub run_sequence: u64,

    /// Execution mode
    pub mode: ExecutionMode,

    /// Set for retries and rollbacks
    #[serde(default)]
    pub rerun_of: Option<RerunInfo>,

    /// When the attempt was created
    pub created_at: DateTime<Utc>,
}

/// Documents of one execution, handed to the runtime and to later retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanExecutionMetadata {
    /// Execution these documents belong to
    pub execution_id: Uuid,

    /// Pipeline YAML as stored, before inputs were merged
    pub raw_document: String,

    /// Plan-ready YAML the plan was compiled from
    pub processed_document: String,

    /// Runtime input set supplied by the caller
    #[serde(default)]
    pub input_set_document: Option<String>,

    /// Stages selected when only a subset of the pipeline was run
    #[serde(default)]
    pub stages_selected: Option<Vec<String>>,

    /// Full merged document when only a subset was run
    #[serde(default)]
    pub full_document_if_subset: Option<String>,
}

impl PlanExecutionMetadata {
    /// Whether the execution ran only a subset of stages
    pub fn is_stage_subset(&self) -> bool {
        self.stages_selected.as_ref().is_some_and(|s| !s.is_empty())
    }
}

/// Summary of a past execution as kept by the history store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    /// Execution ID
    pub execution_id: Uuid,

    /// Final (or current) status
    pub status: ExecutionStatus,

    /// Whether this is the newest execution of its retry chain
    #[serde(default = "default_true")]
    pub is_latest_execution: bool,

    /// When the execution was created
    pub created_at: DateTime<Utc>,

    /// Set once a pipeline rollback ran for this execution
    #[serde(default)]
    pub rollback_execution_id: Option<Uuid>,
}

fn default_true() -> bool {
    true
}
