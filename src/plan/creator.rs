//! Compiles a pipeline document into a plan graph

use crate::core::{ExecutionMode, PipelineDocument, Stage, StageEntry};
use crate::plan::{Node, Plan, PlanNode, SkipBehavior, StepCategory, StepType, TransitionRule};
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const ROLLBACK_MODES: [ExecutionMode; 2] = [
    ExecutionMode::PostExecutionRollback,
    ExecutionMode::PipelineRollback,
];

fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// A step declared inside a stage's execution section
#[derive(Debug, Clone)]
struct StepDeclaration {
    identifier: String,
    name: String,
    step_type: String,
}

/// Builds plans from documents
///
/// Layout of the produced graph:
/// - a root node, the plan's starting node, entering the first entry;
/// - one head node per entry, chained with `Next`: the stage node, the
///   strategy node wrapping it when the stage declares a strategy, or a
///   fork node over the heads of a parallel block's stages;
/// - a chain of step nodes entered from the stage node, and a chain of
///   rollback step nodes entered on failure or in a rollback mode.
#[derive(Debug, Clone, Default)]
pub struct PlanCreator;

impl PlanCreator {
    pub fn new() -> Self {
        Self
    }

    /// Compile a document into a fresh plan
    pub fn create_plan(&self, document: &PipelineDocument) -> Plan {
        let heads: Vec<String> = document.entries.iter().map(|_| new_uuid()).collect();
        let mut nodes = Vec::new();

        let root_uuid = new_uuid();
        let root_rules = match heads.first() {
            Some(first) => vec![TransitionRule::Children(vec![first.clone()])],
            None => vec![TransitionRule::End],
        };
        nodes.push(PlanNode {
            uuid: root_uuid.clone(),
            identifier: document.identifier.clone(),
            name: document
                .name
                .clone()
                .unwrap_or_else(|| document.identifier.clone()),
            stage_fqn: None,
            step_type: StepType::pipeline(),
            transition_rules: root_rules,
            mode_transition_rules: BTreeMap::new(),
            skip_behavior: SkipBehavior::Evaluate,
        });

        for (index, entry) in document.entries.iter().enumerate() {
            let follow = match heads.get(index + 1) {
                Some(next) => TransitionRule::Next(next.clone()),
                None => TransitionRule::End,
            };

            match entry {
                StageEntry::Single(stage) => {
                    nodes.extend(self.stage_nodes(stage, heads[index].clone(), Some(follow)));
                }
                StageEntry::Parallel(stages) => {
                    let member_heads: Vec<String> = stages.iter().map(|_| new_uuid()).collect();
                    nodes.push(PlanNode {
                        uuid: heads[index].clone(),
                        identifier: format!("parallel{}", index),
                        name: "parallel".to_string(),
                        stage_fqn: None,
                        step_type: StepType::fork(),
                        transition_rules: vec![
                            TransitionRule::Children(member_heads.clone()),
                            follow,
                        ],
                        mode_transition_rules: BTreeMap::new(),
                        skip_behavior: SkipBehavior::Evaluate,
                    });
                    for (stage, head) in stages.iter().zip(member_heads) {
                        nodes.extend(self.stage_nodes(stage, head, None));
                    }
                }
            }
        }

        debug!(
            "Created plan for pipeline '{}' with {} nodes",
            document.identifier,
            nodes.len()
        );

        Plan {
            uuid: new_uuid(),
            starting_node_id: root_uuid,
            nodes: nodes.into_iter().map(Node::PlanNode).collect(),
        }
    }

    /// Nodes of one stage; `head` is the uuid other nodes point at
    fn stage_nodes(&self, stage: &Stage, head: String, follow: Option<TransitionRule>) -> Vec<PlanNode> {
        let fqn = stage.fqn();
        let stage_name = stage.name.clone().unwrap_or_else(|| stage.identifier.clone());
        let steps = declared_steps(stage, "steps");
        let rollback_steps = declared_steps(stage, "rollbackSteps");

        let step_nodes = chain_nodes(&fqn, &steps, StepCategory::Step);
        let rollback_nodes = chain_nodes(&fqn, &rollback_steps, StepCategory::RollbackStep);

        let stage_uuid = if stage.has_strategy() { new_uuid() } else { head.clone() };
        let stage_follow = if stage.has_strategy() { None } else { follow.clone() };

        let mut rules = Vec::new();
        if let Some(first) = step_nodes.first() {
            rules.push(TransitionRule::Children(vec![first.uuid.clone()]));
        }
        if let Some(first) = rollback_nodes.first() {
            rules.push(TransitionRule::OnFailure(first.uuid.clone()));
        }
        rules.extend(stage_follow.clone());

        let mut rollback_rules = Vec::new();
        if let Some(first) = rollback_nodes.first() {
            rollback_rules.push(TransitionRule::Children(vec![first.uuid.clone()]));
        }
        rollback_rules.extend(stage_follow);

        let mut nodes = Vec::new();

        if stage.has_strategy() {
            let mut strategy_rules = vec![TransitionRule::Children(vec![stage_uuid.clone()])];
            strategy_rules.extend(follow);
            nodes.push(PlanNode {
                uuid: head,
                identifier: stage.identifier.clone(),
                name: stage_name.clone(),
                stage_fqn: Some(fqn.clone()),
                step_type: StepType::strategy(),
                mode_transition_rules: ROLLBACK_MODES
                    .iter()
                    .map(|mode| (*mode, strategy_rules.clone()))
                    .collect(),
                transition_rules: strategy_rules,
                skip_behavior: SkipBehavior::Evaluate,
            });
        }

        nodes.push(PlanNode {
            uuid: stage_uuid,
            identifier: stage.identifier.clone(),
            name: stage_name,
            stage_fqn: Some(fqn),
            step_type: StepType::new(stage.stage_type().unwrap_or("Custom"), StepCategory::Stage),
            transition_rules: rules,
            mode_transition_rules: ROLLBACK_MODES
                .iter()
                .map(|mode| (*mode, rollback_rules.clone()))
                .collect(),
            skip_behavior: SkipBehavior::Evaluate,
        });

        nodes.extend(step_nodes);
        nodes.extend(rollback_nodes);
        nodes
    }
}

/// Chain step declarations into nodes linked with `Next`
fn chain_nodes(fqn: &str, steps: &[StepDeclaration], category: StepCategory) -> Vec<PlanNode> {
    let uuids: Vec<String> = steps.iter().map(|_| new_uuid()).collect();

    steps
        .iter()
        .enumerate()
        .map(|(i, step)| PlanNode {
            uuid: uuids[i].clone(),
            identifier: step.identifier.clone(),
            name: step.name.clone(),
            stage_fqn: Some(fqn.to_string()),
            step_type: StepType::new(step.step_type.clone(), category),
            transition_rules: vec![match uuids.get(i + 1) {
                Some(next) => TransitionRule::Next(next.clone()),
                None => TransitionRule::End,
            }],
            mode_transition_rules: BTreeMap::new(),
            skip_behavior: SkipBehavior::Evaluate,
        })
        .collect()
}

/// Steps under `spec.execution.<section>`, with groups flattened in order
fn declared_steps(stage: &Stage, section: &str) -> Vec<StepDeclaration> {
    let mut steps = Vec::new();
    if let Some(items) = stage
        .body
        .get("spec")
        .and_then(|spec| spec.get("execution"))
        .and_then(|execution| execution.get(section))
        .and_then(Value::as_sequence)
    {
        flatten_steps(items, &mut steps);
    }
    steps
}

fn flatten_steps(items: &[Value], out: &mut Vec<StepDeclaration>) {
    for item in items {
        if let Some(step) = item.get("step") {
            if let Some(identifier) = step.get("identifier").and_then(Value::as_str) {
                out.push(StepDeclaration {
                    identifier: identifier.to_string(),
                    name: step
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or(identifier)
                        .to_string(),
                    step_type: step
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("Custom")
                        .to_string(),
                });
            }
        } else if let Some(parallel) = item.get("parallel").and_then(Value::as_sequence) {
            flatten_steps(parallel, out);
        } else if let Some(group) = item.get("stepGroup") {
            if let Some(nested) = group.get("steps").and_then(Value::as_sequence) {
                flatten_steps(nested, out);
            }
        }
    }
}
