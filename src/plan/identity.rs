//! Identity node substitution
//!
//! Rewrites the nodes of stages that are not re-run into identity nodes that
//! replay a prior node execution instead of executing again.

use crate::core::{stage_fqn, ExecutionMode, ExecutionStatus};
use crate::error::PlanError;
use crate::plan::{IdentityPlanNode, Node, Plan, PlanNode, SkipBehavior, StepCategory, StepType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// One node execution of a prior run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionRecord {
    /// Node execution ID
    pub uuid: String,

    /// Plan node the execution was created from
    pub plan_node_id: String,

    pub identifier: String,

    #[serde(default)]
    pub stage_fqn: Option<String>,

    pub step_type: StepType,
    pub status: ExecutionStatus,
}

/// What to do with a skipped stage that left no node execution behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingHistory {
    /// Fail with `MissingHistoryReference`
    #[default]
    Fail,
    /// Keep the node executable
    Keep,
}

/// Parameters of one substitution pass
#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionRequest {
    /// Stages whose nodes replay history
    pub skip_stages: Vec<String>,

    /// Stages that re-run; their strategy nodes still replay prior instances
    pub retry_stages: Vec<String>,

    /// Mode of the new execution
    pub mode: ExecutionMode,

    /// Take rules from the node's mode-specific set for `mode`
    pub replay_transition_rules: bool,

    pub on_missing: MissingHistory,

    /// Leave rollback step nodes executable
    pub execute_rollback_steps: bool,
}

impl SubstitutionRequest {
    /// Request used by retries
    pub fn retry(skip_stages: Vec<String>, retry_stages: Vec<String>) -> Self {
        Self {
            skip_stages,
            retry_stages,
            mode: ExecutionMode::Rerun,
            replay_transition_rules: false,
            on_missing: MissingHistory::Fail,
            execute_rollback_steps: false,
        }
    }

    /// Request used by rollback-mode executions
    pub fn rollback(skip_stages: Vec<String>, mode: ExecutionMode) -> Self {
        Self {
            skip_stages,
            retry_stages: Vec::new(),
            mode,
            replay_transition_rules: true,
            on_missing: MissingHistory::Keep,
            execute_rollback_steps: true,
        }
    }
}

/// Prior node executions indexed for matching
struct History<'a> {
    records: &'a [NodeExecutionRecord],
}

impl<'a> History<'a> {
    fn find(&self, fqn: &str, identifier: &str, category: StepCategory) -> Option<&'a NodeExecutionRecord> {
        self.records.iter().find(|r| {
            r.stage_fqn.as_deref() == Some(fqn)
                && r.identifier == identifier
                && r.step_type.category == category
        })
    }

    /// First strategy instance produced for the stage, if any
    fn strategy_instance(&self, fqn: &str) -> Option<&'a NodeExecutionRecord> {
        self.records
            .iter()
            .find(|r| r.stage_fqn.as_deref() == Some(fqn) && r.step_type.is_strategy())
    }
}

fn to_identity(
    node: &PlanNode,
    record: &NodeExecutionRecord,
    replay_rules: Option<ExecutionMode>,
    skip_behavior: SkipBehavior,
) -> Node {
    let transition_rules = replay_rules
        .and_then(|mode| node.mode_transition_rules.get(&mode).cloned())
        .unwrap_or_else(|| node.transition_rules.clone());

    Node::IdentityPlanNode(IdentityPlanNode {
        uuid: node.uuid.clone(),
        identifier: node.identifier.clone(),
        name: node.name.clone(),
        stage_fqn: node.stage_fqn.clone(),
        step_type: node.step_type.clone(),
        original_execution_ref: record.uuid.clone(),
        replay_transition_rules: replay_rules.is_some(),
        transition_rules,
        skip_behavior,
    })
}

/// Rewrite a plan so skipped stages replay the given prior node executions
///
/// Nodes without a stage (the root and fork nodes) are never rewritten.
/// Strategy nodes of skipped stages are replaced only when the prior run
/// produced strategy instances for the stage; strategy nodes of retried
/// stages are replaced the same way but keep evaluating, so only failed
/// instances run again.
pub fn substitute_identity_nodes(
    plan: &Plan,
    prior: &[NodeExecutionRecord],
    request: &SubstitutionRequest,
) -> Result<Plan, PlanError> {
    let history = History { records: prior };
    let skipped: HashSet<String> = request.skip_stages.iter().map(|id| stage_fqn(id)).collect();
    let retried: HashSet<String> = request.retry_stages.iter().map(|id| stage_fqn(id)).collect();
    let replay_mode = request.replay_transition_rules.then_some(request.mode);

    let mut nodes = Vec::with_capacity(plan.nodes.len());
    let mut substituted = 0usize;

    for node in &plan.nodes {
        let Node::PlanNode(plan_node) = node else {
            nodes.push(node.clone());
            continue;
        };
        let Some(fqn) = plan_node.stage_fqn.as_deref() else {
            nodes.push(node.clone());
            continue;
        };
        let category = plan_node.step_type.category;

        if retried.contains(fqn) {
            match (category, history.strategy_instance(fqn)) {
                (StepCategory::Strategy, Some(record)) => {
                    nodes.push(to_identity(
                        plan_node,
                        record,
                        Some(request.mode),
                        SkipBehavior::Evaluate,
                    ));
                    substituted += 1;
                }
                _ => nodes.push(node.clone()),
            }
            continue;
        }

        if !skipped.contains(fqn)
            || (category == StepCategory::RollbackStep && request.execute_rollback_steps)
        {
            nodes.push(node.clone());
            continue;
        }

        let record = match category {
            StepCategory::Strategy => history.strategy_instance(fqn),
            _ => history.find(fqn, &plan_node.identifier, category),
        };

        match record {
            Some(record) => {
                nodes.push(to_identity(
                    plan_node,
                    record,
                    replay_mode,
                    SkipBehavior::AlreadySatisfied,
                ));
                substituted += 1;
            }
            None if category == StepCategory::Stage && request.on_missing == MissingHistory::Fail => {
                return Err(PlanError::MissingHistoryReference {
                    identifier: plan_node.identifier.clone(),
                    stage_fqn: fqn.to_string(),
                });
            }
            None => {
                if category == StepCategory::Stage {
                    warn!(
                        "No prior execution for stage '{}', keeping it executable",
                        plan_node.identifier
                    );
                }
                nodes.push(node.clone());
            }
        }
    }

    debug!(
        "Substituted {} of {} nodes with identity nodes ({:?})",
        substituted,
        plan.nodes.len(),
        request.mode
    );

    Ok(Plan {
        uuid: plan.uuid.clone(),
        starting_node_id: plan.starting_node_id.clone(),
        nodes,
    })
}
