//! Execution plan: a graph of typed nodes compiled from a pipeline document

pub mod creator;
pub mod identity;

pub use creator::PlanCreator;
pub use identity::{substitute_identity_nodes, MissingHistory, NodeExecutionRecord, SubstitutionRequest};

use crate::core::ExecutionMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Broad category of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepCategory {
    /// Root of the plan
    Pipeline,
    /// Fan-out over parallel stages
    Fork,
    /// Matrix/loop expansion wrapping a stage
    Strategy,
    /// A stage
    Stage,
    /// A step of a stage's execution
    Step,
    /// A step only entered when rolling back
    RollbackStep,
}

/// Type of work a node performs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepType {
    /// Concrete type, e.g. `Deployment` or `ShellScript`
    pub name: String,

    /// Category the type belongs to
    pub category: StepCategory,
}

impl StepType {
    pub fn new(name: impl Into<String>, category: StepCategory) -> Self {
        Self {
            name: name.into(),
            category,
        }
    }

    pub fn pipeline() -> Self {
        Self::new("PIPELINE_SECTION", StepCategory::Pipeline)
    }

    pub fn fork() -> Self {
        Self::new("NG_FORK", StepCategory::Fork)
    }

    pub fn strategy() -> Self {
        Self::new("STRATEGY", StepCategory::Strategy)
    }

    pub fn is_strategy(&self) -> bool {
        self.category == StepCategory::Strategy
    }
}

/// Where the runtime goes next from a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "nodes", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionRule {
    /// Enter the given child nodes, concurrently when more than one
    Children(Vec<String>),
    /// Continue with the given node once this one completes
    Next(String),
    /// Route to the given node when this one fails
    OnFailure(String),
    /// Nothing follows
    End,
}

/// How the runtime treats a node it reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipBehavior {
    /// Evaluate the node's own conditions and run it
    #[default]
    Evaluate,
    /// Treat the node as already satisfied by history
    AlreadySatisfied,
}

/// A node that executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
    pub uuid: String,
    pub identifier: String,
    pub name: String,

    /// `pipeline.stages.<id>` of the owning stage; `None` above stage level
    pub stage_fqn: Option<String>,

    pub step_type: StepType,
    pub transition_rules: Vec<TransitionRule>,

    /// Rules captured at plan-build time for specific execution modes
    #[serde(default)]
    pub mode_transition_rules: BTreeMap<ExecutionMode, Vec<TransitionRule>>,

    #[serde(default)]
    pub skip_behavior: SkipBehavior,
}

/// A node that replays a prior execution instead of running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPlanNode {
    pub uuid: String,
    pub identifier: String,
    pub name: String,
    pub stage_fqn: Option<String>,
    pub step_type: StepType,

    /// Node execution whose outcome is replayed
    pub original_execution_ref: String,

    /// Rules were taken from the mode-specific set rather than the node's own
    pub replay_transition_rules: bool,

    pub transition_rules: Vec<TransitionRule>,
    pub skip_behavior: SkipBehavior,
}

/// Any node of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "nodeType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Node {
    PlanNode(PlanNode),
    IdentityPlanNode(IdentityPlanNode),
}

impl Node {
    pub fn uuid(&self) -> &str {
        match self {
            Node::PlanNode(n) => &n.uuid,
            Node::IdentityPlanNode(n) => &n.uuid,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Node::PlanNode(n) => &n.identifier,
            Node::IdentityPlanNode(n) => &n.identifier,
        }
    }

    pub fn stage_fqn(&self) -> Option<&str> {
        match self {
            Node::PlanNode(n) => n.stage_fqn.as_deref(),
            Node::IdentityPlanNode(n) => n.stage_fqn.as_deref(),
        }
    }

    pub fn step_type(&self) -> &StepType {
        match self {
            Node::PlanNode(n) => &n.step_type,
            Node::IdentityPlanNode(n) => &n.step_type,
        }
    }

    pub fn transition_rules(&self) -> &[TransitionRule] {
        match self {
            Node::PlanNode(n) => &n.transition_rules,
            Node::IdentityPlanNode(n) => &n.transition_rules,
        }
    }

    pub fn skip_behavior(&self) -> SkipBehavior {
        match self {
            Node::PlanNode(n) => n.skip_behavior,
            Node::IdentityPlanNode(n) => n.skip_behavior,
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Node::IdentityPlanNode(_))
    }

    pub fn as_identity(&self) -> Option<&IdentityPlanNode> {
        match self {
            Node::IdentityPlanNode(n) => Some(n),
            Node::PlanNode(_) => None,
        }
    }
}

/// A compiled plan
///
/// The node list carries no ordering of its own; execution order is
/// encoded only by transition rules, starting at `starting_node_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub uuid: String,
    pub starting_node_id: String,
    pub nodes: Vec<Node>,
}

impl Plan {
    /// Look up a node by uuid
    pub fn node(&self, uuid: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.uuid() == uuid)
    }

    /// All nodes carrying the given identifier
    pub fn nodes_by_identifier<'a>(&'a self, identifier: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes.iter().filter(move |n| n.identifier() == identifier)
    }

    /// All nodes owned by the given stage
    pub fn nodes_of_stage<'a>(&'a self, stage_fqn: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes.iter().filter(move |n| n.stage_fqn() == Some(stage_fqn))
    }

    /// The stage node of a stage, if the plan has one
    pub fn stage_node(&self, stage_fqn: &str) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|n| n.stage_fqn() == Some(stage_fqn) && n.step_type().category == StepCategory::Stage)
    }

    /// Nodes replaying history
    pub fn identity_nodes(&self) -> impl Iterator<Item = &IdentityPlanNode> {
        self.nodes.iter().filter_map(Node::as_identity)
    }
}
