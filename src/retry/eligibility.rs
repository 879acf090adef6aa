//! Preconditions for retrying an execution and retry chain history

use crate::core::{ExecutionSummary, PlanExecutionMetadata, StageRecord};
use crate::error::PlanError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// What is known about an execution a user asked to retry
#[derive(Debug, Clone)]
pub struct EligibilityCheck<'a> {
    /// Pipeline the execution belongs to
    pub pipeline_identifier: &'a str,

    /// Whether the pipeline still exists
    pub pipeline_exists: bool,

    pub summary: &'a ExecutionSummary,

    /// Documents recorded for the execution, if any survived
    pub plan_metadata: Option<&'a PlanExecutionMetadata>,

    /// Reference time for the retry window
    pub now: DateTime<Utc>,
}

/// Fail with `NotRetryable` unless the execution can be retried
pub fn check_retry_eligibility(check: &EligibilityCheck<'_>, retry_window_days: i64) -> Result<(), PlanError> {
    if !check.pipeline_exists {
        return Err(PlanError::NotRetryable(format!(
            "Pipeline with the given ID: {} does not exist or has been deleted",
            check.pipeline_identifier
        )));
    }

    if !check.summary.is_latest_execution {
        return Err(PlanError::NotRetryable(
            "This execution is not the latest of all retried execution. You can only retry the latest execution."
                .to_string(),
        ));
    }

    if check.summary.rollback_execution_id.is_some() {
        return Err(PlanError::NotRetryable(
            "This execution has undergone Pipeline Rollback, and hence cannot be retried.".to_string(),
        ));
    }

    if check.now - check.summary.created_at > Duration::days(retry_window_days) {
        return Err(PlanError::NotRetryable(format!(
            "Execution is more than {} days old. Cannot retry",
            retry_window_days
        )));
    }

    if check.plan_metadata.is_none() {
        return Err(PlanError::NotRetryable(format!(
            "No Plan Execution exists for id {}",
            check.summary.execution_id
        )));
    }

    debug!("Execution {} is eligible for retry", check.summary.execution_id);
    Ok(())
}

/// Narrow a selection to the stages that failed in the prior execution
///
/// The result follows execution order.
pub fn fetch_only_failed_stages(records: &[StageRecord], selected: &[String]) -> Result<Vec<String>, PlanError> {
    if selected.is_empty() {
        return Err(PlanError::InvalidRetrySelection(
            "stage identifiers cannot be empty when retrying only failed stages".to_string(),
        ));
    }

    if let Some(unknown) = selected
        .iter()
        .find(|id| !records.iter().any(|r| &r.identifier == *id))
    {
        return Err(PlanError::InvalidRetrySelection(format!(
            "stage '{}' did not run in the execution being retried",
            unknown
        )));
    }

    Ok(records
        .iter()
        .filter(|r| r.status.is_failed() && selected.contains(&r.identifier))
        .map(|r| r.identifier.clone())
        .collect())
}

/// Fail unless every stage a retry reuses succeeded in the prior execution
///
/// Stages without a record are left to identity substitution.
pub fn check_reusable_stages(records: &[StageRecord], skip_set: &[String]) -> Result<(), PlanError> {
    let unusable = skip_set.iter().find_map(|id| {
        records
            .iter()
            .find(|r| &r.identifier == id)
            .filter(|r| !r.status.is_success())
    });

    match unusable {
        Some(record) => Err(PlanError::InvalidRetrySelection(format!(
            "stage '{}' ended {:?} in the execution being retried and cannot be reused; select it or an earlier stage",
            record.identifier, record.status
        ))),
        None => Ok(()),
    }
}

/// History of a retry chain, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryHistory {
    #[serde(default)]
    pub latest_execution_id: Option<Uuid>,

    #[serde(default)]
    pub executions: Vec<ExecutionSummary>,

    /// Set when the chain holds a single execution
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Build the history of a retry chain from summaries listed newest first
pub fn retry_history(summaries: &[ExecutionSummary]) -> RetryHistory {
    if summaries.len() <= 1 {
        return RetryHistory {
            latest_execution_id: None,
            executions: Vec::new(),
            error_message: Some("Execution has not been retried yet".to_string()),
        };
    }

    RetryHistory {
        latest_execution_id: summaries.first().map(|s| s.execution_id),
        executions: summaries.to_vec(),
        error_message: None,
    }
}
