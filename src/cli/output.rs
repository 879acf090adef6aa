//! CLI output formatting

use crate::{
    core::{ExecutionMode, ExecutionStatus, PipelineDocument},
    execution::{BuildPhase, ExecutionHandoff},
    plan::StepCategory,
};
use console::Emoji;
use std::collections::HashSet;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static REPLAY: Emoji<'_, '_> = Emoji("♻️  ", "= ");

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    let label = serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", status));
    if status.is_success() {
        style(label).green().to_string()
    } else if status.is_failed() {
        style(label).red().to_string()
    } else if status == ExecutionStatus::Running {
        style(label).yellow().to_string()
    } else {
        style(label).dim().to_string()
    }
}

/// Format an execution mode for display
pub fn format_mode(mode: ExecutionMode) -> String {
    match mode {
        ExecutionMode::Normal => style("NORMAL").green().to_string(),
        ExecutionMode::Rerun => style("RERUN").yellow().to_string(),
        ExecutionMode::PostExecutionRollback => style("POST_EXECUTION_ROLLBACK").magenta().to_string(),
        ExecutionMode::PipelineRollback => style("PIPELINE_ROLLBACK").magenta().to_string(),
    }
}

/// Format a build phase transition
pub fn format_phase(phase: BuildPhase) -> String {
    format!("  {} {}", style("→").dim(), style(phase).dim())
}

/// Format the stage list of a document, one entry per line
pub fn format_skeleton(document: &PipelineDocument) -> Vec<String> {
    document
        .skeleton()
        .iter()
        .enumerate()
        .map(|(index, entry)| format!("  {}. {}", index + 1, style(entry).cyan()))
        .collect()
}

/// Format a handoff for display
pub fn format_handoff(handoff: &ExecutionHandoff) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{} Execution {} of {} ({})",
            ROCKET,
            style(&handoff.metadata.execution_id.to_string()[..8]).dim(),
            style(&handoff.metadata.pipeline_identifier).bold(),
            format_mode(handoff.metadata.mode)
        ),
        format!(
            "  Run #{} triggered by {}",
            handoff.metadata.run_sequence,
            style(&handoff.metadata.trigger_info.triggered_by).cyan()
        ),
    ];

    if let Some(rerun) = &handoff.metadata.rerun_of {
        lines.push(format!(
            "  Replays {} (chain root {})",
            style(&rerun.previous_execution_id.to_string()[..8]).dim(),
            style(&rerun.root_execution_id.to_string()[..8]).dim()
        ));
    }

    let reused: HashSet<&str> = handoff.skip_set.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    for node in &handoff.plan.nodes {
        if node.step_type().category != StepCategory::Stage || !seen.insert(node.identifier()) {
            continue;
        }
        let line = if node.is_identity() || reused.contains(node.identifier()) {
            format!("  {}{} {}", REPLAY, style(node.identifier()).dim(), style("(reused)").dim())
        } else {
            format!("  {}{}", CHECK, style(node.identifier()).green())
        };
        lines.push(line);
    }

    lines.push(format!(
        "  {} nodes, {} identity",
        style(handoff.plan.nodes.len()).cyan(),
        style(handoff.plan.identity_nodes().count()).cyan()
    ));
    lines
}
