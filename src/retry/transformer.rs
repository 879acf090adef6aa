//! Retry plan transformation
//!
//! Given the current document, the document of the failed execution and the
//! stages a user wants to re-run, decide which stages execute again and which
//! reuse their prior result.

use crate::core::{PipelineDocument, Stage, StageEntry};
use crate::error::PlanError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

/// Which siblings re-run when only part of a parallel block is selected
///
/// | block `[a, b, c]`, selected | `SelectedOnly` | `FromEarliestSelected` | `WholeGroup` |
/// |-----------------------------|----------------|------------------------|--------------|
/// | `{a}`                       | reuse b, c     | reuse none             | reuse none   |
/// | `{b}`                       | reuse a, c     | reuse a                | reuse none   |
/// | `{c}`                       | reuse a, b     | reuse a, b             | reuse none   |
/// | `{a, c}`                    | reuse b        | reuse none             | reuse none   |
/// | `{b, c}`                    | reuse a        | reuse a                | reuse none   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParallelRetryPolicy {
    /// Only selected siblings re-run
    #[default]
    SelectedOnly,
    /// Siblings from the earliest selected one onwards re-run
    FromEarliestSelected,
    /// Every sibling re-runs
    WholeGroup,
}

impl fmt::Display for ParallelRetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParallelRetryPolicy::SelectedOnly => "selected-only",
            ParallelRetryPolicy::FromEarliestSelected => "from-earliest-selected",
            ParallelRetryPolicy::WholeGroup => "whole-group",
        };
        f.write_str(name)
    }
}

impl ParallelRetryPolicy {
    /// Members of the first selected entry that reuse their prior result
    fn reused<'a>(&self, members: &'a [Stage], selected: &HashSet<&str>) -> Vec<&'a str> {
        match self {
            ParallelRetryPolicy::SelectedOnly => members
                .iter()
                .filter(|s| !selected.contains(s.identifier.as_str()))
                .map(|s| s.identifier.as_str())
                .collect(),
            ParallelRetryPolicy::FromEarliestSelected => members
                .iter()
                .take_while(|s| !selected.contains(s.identifier.as_str()))
                .map(|s| s.identifier.as_str())
                .collect(),
            ParallelRetryPolicy::WholeGroup => Vec::new(),
        }
    }
}

/// Outcome of a retry transformation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPlan {
    /// Stages that execute, in declared order and grouping
    pub processed: PipelineDocument,

    /// Full stage list: reused stages carry their prior bodies, the rest the
    /// current ones. Compiled into the plan so reused stages have nodes to
    /// replay.
    pub replay: PipelineDocument,

    /// Stages reusing their prior result, in declared order
    pub skip_set: Vec<String>,

    /// Selected stages, in declared order
    pub retry_stages: Vec<String>,
}

impl RetryPlan {
    /// Stages that execute, in declared order
    pub fn executed_stages(&self) -> Vec<&str> {
        self.processed.stage_identifiers()
    }
}

/// Fail unless both documents declare the same stage list shape
pub fn validate_retry(current: &PipelineDocument, previous: &PipelineDocument) -> Result<(), PlanError> {
    let current_skeleton = current.skeleton();
    let previous_skeleton = previous.skeleton();

    if current_skeleton.len() != previous_skeleton.len() {
        return Err(PlanError::NotRetryable(format!(
            "the pipeline now has {} stage entries, the failed execution had {}",
            current_skeleton.len(),
            previous_skeleton.len()
        )));
    }

    for (index, (now, before)) in current_skeleton.iter().zip(&previous_skeleton).enumerate() {
        if now != before {
            return Err(PlanError::NotRetryable(format!(
                "stage entry {} changed from '{}' to '{}'",
                index + 1,
                before,
                now
            )));
        }
    }

    Ok(())
}

/// Compute the stages to run and reuse for a retry of `selection`
pub fn retry_processed_document(
    current: &PipelineDocument,
    previous: &PipelineDocument,
    selection: &[String],
    policy: ParallelRetryPolicy,
) -> Result<RetryPlan, PlanError> {
    if selection.is_empty() {
        return Err(PlanError::InvalidRetrySelection(
            "at least one stage must be selected".to_string(),
        ));
    }
    if let Some(unknown) = selection.iter().find(|id| !current.contains_stage(id)) {
        return Err(PlanError::InvalidRetrySelection(format!(
            "stage '{}' does not exist in pipeline '{}'",
            unknown, current.identifier
        )));
    }

    validate_retry(current, previous)?;

    let selected: HashSet<&str> = selection.iter().map(String::as_str).collect();
    let first_selected = current
        .entries
        .iter()
        .position(|entry| entry.members().iter().any(|s| selected.contains(s.identifier.as_str())))
        .ok_or_else(|| PlanError::InvalidRetrySelection("no selected stage found".to_string()))?;

    let mut skipped: HashSet<&str> = HashSet::new();
    for entry in &current.entries[..first_selected] {
        skipped.extend(entry.identifiers());
    }
    skipped.extend(policy.reused(current.entries[first_selected].members(), &selected));

    debug!(
        "First selected entry is #{} of {}, policy {}",
        first_selected + 1,
        current.entries.len(),
        policy
    );

    let skip_set: Vec<String> = current
        .stages()
        .filter(|s| skipped.contains(s.identifier.as_str()))
        .map(|s| s.identifier.clone())
        .collect();

    let processed = current.retain_stages(|s| !skipped.contains(s.identifier.as_str()));
    if processed.entries.is_empty() {
        return Err(PlanError::InvalidRetrySelection(
            "every stage would be reused, nothing left to execute".to_string(),
        ));
    }

    let replay = current.with_entries(
        current
            .entries
            .iter()
            .map(|entry| replay_entry(entry, previous, &skipped))
            .collect(),
    );

    let retry_stages: Vec<String> = current
        .stages()
        .filter(|s| selected.contains(s.identifier.as_str()))
        .map(|s| s.identifier.clone())
        .collect();

    info!(
        "Retry of pipeline '{}': running {} stage(s), reusing {}",
        current.identifier,
        processed.stages().count(),
        skip_set.len()
    );

    Ok(RetryPlan {
        processed,
        replay,
        skip_set,
        retry_stages,
    })
}

fn replay_entry(entry: &StageEntry, previous: &PipelineDocument, skipped: &HashSet<&str>) -> StageEntry {
    let pick = |stage: &Stage| -> Stage {
        if skipped.contains(stage.identifier.as_str()) {
            previous
                .stage(&stage.identifier)
                .cloned()
                .unwrap_or_else(|| stage.clone())
        } else {
            stage.clone()
        }
    };

    match entry {
        StageEntry::Single(stage) => StageEntry::Single(pick(stage)),
        StageEntry::Parallel(stages) => StageEntry::Parallel(stages.iter().map(pick).collect()),
    }
}
