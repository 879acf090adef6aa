//! Rollback-mode rewriting of a prior execution's stage list
//!
//! A rollback replays a prior execution backwards: either every entry in
//! reverse order, or only the entries holding selected stages. Parallel
//! blocks are never split.

use crate::core::{ExecutionMode, PipelineDocument, StageEntry, StageRecord};
use crate::error::PlanError;
use crate::retry::group_stage_records;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Shape of a rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackMode {
    /// Every entry, last first
    ReverseAll,
    /// Only entries holding stages matched by a filter, last first
    ReverseSelected,
}

impl RollbackMode {
    /// Execution mode recorded for the rollback run
    pub fn execution_mode(&self) -> ExecutionMode {
        match self {
            RollbackMode::ReverseAll => ExecutionMode::PipelineRollback,
            RollbackMode::ReverseSelected => ExecutionMode::PostExecutionRollback,
        }
    }
}

/// Which prior stages a subset rollback covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageFilter {
    /// Stages that ran in the prior execution
    Executed,
    /// Stages that failed in the prior execution
    Failed,
    /// The named stages
    Identifiers(Vec<String>),
}

impl StageFilter {
    pub fn matches(&self, record: &StageRecord) -> bool {
        match self {
            StageFilter::Executed => record.status.has_run(),
            StageFilter::Failed => record.status.is_failed(),
            StageFilter::Identifiers(ids) => ids.contains(&record.identifier),
        }
    }
}

/// Result of a rollback transformation
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackPlan {
    /// Stage list of the rollback run
    pub document: PipelineDocument,

    pub mode: ExecutionMode,

    /// Stages replayed by the rollback, in output order
    pub stages: Vec<String>,

    /// Recorded document the rollback was derived from
    pub source: PipelineDocument,
}

/// Reverse the top-level entries; block internals keep their order
pub fn reverse_all(document: &PipelineDocument) -> PipelineDocument {
    document.reversed()
}

/// Keep the entries holding stages selected by `filter`, last first
///
/// Records are grouped the way they ran, and a group is kept whole as soon
/// as one of its members is selected.
pub fn reverse_selected(
    document: &PipelineDocument,
    records: &[StageRecord],
    filter: &StageFilter,
) -> Result<PipelineDocument, PlanError> {
    if let Some(unknown) = records.iter().find(|r| !document.contains_stage(&r.identifier)) {
        return Err(PlanError::NotRollbackable(format!(
            "stage '{}' of the execution is not declared in its pipeline document",
            unknown.identifier
        )));
    }

    let mut included: HashSet<&str> = HashSet::new();
    for group in group_stage_records(records) {
        if group.members.iter().any(|m| filter.matches(m)) {
            for member in &group.members {
                if let Some(stage) = document.stage(&member.identifier) {
                    included.insert(stage.identifier.as_str());
                }
            }
        }
    }

    if included.is_empty() {
        return Err(PlanError::EmptySelection(format!(
            "no stage of the execution matches {:?}",
            filter
        )));
    }

    let entries: Vec<StageEntry> = document
        .entries
        .iter()
        .rev()
        .filter_map(|entry| {
            StageEntry::from_stages(
                entry
                    .members()
                    .iter()
                    .filter(|s| included.contains(s.identifier.as_str()))
                    .cloned()
                    .collect(),
            )
        })
        .collect();

    debug!(
        "Selected {} of {} entries for rollback",
        entries.len(),
        document.entries.len()
    );

    Ok(document.with_entries(entries))
}

/// Build the stage list of a rollback run from the prior execution's
/// recorded document
pub fn transform_for_rollback(
    prior_document: &str,
    mode: RollbackMode,
    records: &[StageRecord],
    filter: &StageFilter,
) -> Result<RollbackPlan, PlanError> {
    let source = PipelineDocument::parse(prior_document)
        .map_err(|e| PlanError::NotRollbackable(e.to_string()))?;

    let document = match mode {
        RollbackMode::ReverseAll => {
            if source.entries.is_empty() {
                return Err(PlanError::EmptySelection(
                    "the execution has no stages to roll back".to_string(),
                ));
            }
            reverse_all(&source)
        }
        RollbackMode::ReverseSelected => reverse_selected(&source, records, filter)?,
    };

    let stages: Vec<String> = document.stages().map(|s| s.identifier.clone()).collect();
    info!(
        "Rollback of pipeline '{}' ({:?}) covers {} stage(s)",
        document.identifier,
        mode,
        stages.len()
    );

    Ok(RollbackPlan {
        document,
        mode: mode.execution_mode(),
        stages,
        source,
    })
}
