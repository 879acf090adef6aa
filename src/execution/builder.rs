//! Execution plan builder - turns a run request into a plan for the runtime

use crate::{
    core::{
        EngineConfig, ExecutionMetadata, ExecutionMode, ExecutionSummary, PipelineDocument,
        PlanExecutionMetadata, RerunInfo, StageRecord, TriggerInfo,
    },
    error::PlanError,
    execution::{
        ExpressionReferenceValidator, InputSetMerger, RuntimeInputMerger, StaticReferenceValidator,
    },
    plan::{substitute_identity_nodes, NodeExecutionRecord, Plan, PlanCreator, SubstitutionRequest},
    retry::{
        check_retry_eligibility, check_reusable_stages, fetch_only_failed_stages, retry_processed_document,
        EligibilityCheck,
    },
    rollback::{transform_for_rollback, RollbackMode, StageFilter},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

/// A stored pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEntity {
    pub identifier: String,

    /// Pipeline YAML as saved
    pub yaml: String,

    /// Saved as a draft; drafts cannot run
    #[serde(default)]
    pub draft: bool,
}

/// Everything recorded about a prior execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorExecution {
    pub metadata: ExecutionMetadata,

    /// Documents of the execution, if they are still stored
    #[serde(default)]
    pub plan_metadata: Option<PlanExecutionMetadata>,

    pub summary: ExecutionSummary,

    /// Stage executions in execution order
    #[serde(default)]
    pub stages: Vec<StageRecord>,

    /// Node executions
    #[serde(default)]
    pub nodes: Vec<NodeExecutionRecord>,
}

impl PriorExecution {
    fn rerun_info(&self) -> RerunInfo {
        RerunInfo {
            root_execution_id: self
                .metadata
                .rerun_of
                .as_ref()
                .map(|r| r.root_execution_id)
                .unwrap_or(self.metadata.execution_id),
            previous_execution_id: self.metadata.execution_id,
        }
    }
}

/// What kind of run is requested
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionKind {
    /// A new run; a non-empty selection runs only those stages
    Fresh { stages_selected: Vec<String> },
    /// A retry of a failed execution
    Retry {
        prior: PriorExecution,
        stages: Vec<String>,
        only_failed_stages: bool,
    },
    /// A rollback of a prior execution
    Rollback {
        prior: PriorExecution,
        mode: RollbackMode,
        filter: StageFilter,
    },
}

/// A request to start a run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    pub pipeline: PipelineEntity,
    pub trigger: TriggerInfo,
    pub run_sequence: u64,

    /// Runtime input set YAML
    pub input_set: Option<String>,

    pub kind: ExecutionKind,
}

/// Everything handed to the runtime to start the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHandoff {
    pub metadata: ExecutionMetadata,
    pub plan_metadata: PlanExecutionMetadata,
    pub plan: Plan,

    /// Stages replaying a prior result
    pub skip_set: Vec<String>,

    /// YAML of the stages that execute
    pub processed_document: String,
}

/// Phases a request moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    ValidateDraftState,
    ResolveTriggerInfo,
    MergeRuntimeInputs,
    Transform,
    AssignExecutionId,
    ValidateStaticReferences,
    BuildPlan,
    SubstituteIdentityNodes,
    Handoff,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::ValidateDraftState => "validate-draft-state",
            BuildPhase::ResolveTriggerInfo => "resolve-trigger-info",
            BuildPhase::MergeRuntimeInputs => "merge-runtime-inputs",
            BuildPhase::Transform => "transform",
            BuildPhase::AssignExecutionId => "assign-execution-id",
            BuildPhase::ValidateStaticReferences => "validate-static-references",
            BuildPhase::BuildPlan => "build-plan",
            BuildPhase::SubstituteIdentityNodes => "substitute-identity-nodes",
            BuildPhase::Handoff => "handoff",
        };
        f.write_str(name)
    }
}

/// Type for phase handlers
pub type PhaseHandler = Box<dyn Fn(BuildPhase) + Send + Sync>;

/// Output of the transform phase
struct Transformed {
    mode: ExecutionMode,
    rerun_of: Option<RerunInfo>,

    /// Document compiled into the plan
    compiled: PipelineDocument,

    /// Stages that execute
    processed: PipelineDocument,

    /// Document checked by the reference validator
    validated: PipelineDocument,

    skip_set: Vec<String>,
    substitution: Option<SubstitutionRequest>,
    raw_document: String,
    input_set_document: Option<String>,
    stages_selected: Option<Vec<String>>,
    full_document_if_subset: Option<String>,
}

/// Builds execution plans for fresh runs, retries and rollbacks
pub struct ExecutionPlanBuilder {
    config: EngineConfig,
    merger: Box<dyn RuntimeInputMerger>,
    validator: Box<dyn StaticReferenceValidator>,
    creator: PlanCreator,
    phase_handlers: Vec<PhaseHandler>,
}

impl ExecutionPlanBuilder {
    /// Create a builder with the default collaborators
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            merger: Box::new(InputSetMerger::new()),
            validator: Box::new(ExpressionReferenceValidator::new()),
            creator: PlanCreator::new(),
            phase_handlers: Vec::new(),
        }
    }

    pub fn with_input_merger<M: RuntimeInputMerger + 'static>(mut self, merger: M) -> Self {
        self.merger = Box::new(merger);
        self
    }

    pub fn with_reference_validator<V: StaticReferenceValidator + 'static>(mut self, validator: V) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Add a handler called on every phase transition
    pub fn with_phase_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(BuildPhase) + Send + Sync + 'static,
    {
        self.phase_handlers.push(Box::new(handler));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn enter(&self, phase: BuildPhase) {
        debug!("Entering phase {}", phase);
        for handler in &self.phase_handlers {
            handler(phase);
        }
    }

    /// Build the handoff for a request
    pub fn build(&self, request: &ExecutionRequest) -> Result<ExecutionHandoff, PlanError> {
        self.build_at(request, Utc::now())
    }

    /// Build the handoff for a request as of `now`
    pub fn build_at(&self, request: &ExecutionRequest, now: DateTime<Utc>) -> Result<ExecutionHandoff, PlanError> {
        let pipeline = &request.pipeline;

        self.enter(BuildPhase::ValidateDraftState);
        if pipeline.draft {
            return Err(PlanError::DraftPipeline(pipeline.identifier.clone()));
        }

        self.enter(BuildPhase::ResolveTriggerInfo);
        let trigger_info = match &request.kind {
            ExecutionKind::Fresh { .. } => request.trigger.clone(),
            ExecutionKind::Retry { .. } | ExecutionKind::Rollback { .. } => {
                TriggerInfo::manual(request.trigger.triggered_by.clone())
            }
        };

        self.enter(BuildPhase::MergeRuntimeInputs);
        let input_set = match &request.kind {
            ExecutionKind::Retry { prior, .. } => request.input_set.clone().or_else(|| {
                prior
                    .plan_metadata
                    .as_ref()
                    .and_then(|m| m.input_set_document.clone())
            }),
            _ => request.input_set.clone(),
        };
        let merged_yaml = match &request.kind {
            ExecutionKind::Rollback { .. } => None,
            _ => Some(self.merger.merge(&pipeline.yaml, input_set.as_deref())?),
        };

        self.enter(BuildPhase::Transform);
        let transformed = match &request.kind {
            ExecutionKind::Fresh { stages_selected } => {
                self.transform_fresh(pipeline, merged_yaml.as_deref(), input_set, stages_selected)?
            }
            ExecutionKind::Retry {
                prior,
                stages,
                only_failed_stages,
            } => self.transform_retry(
                pipeline,
                merged_yaml.as_deref(),
                input_set,
                prior,
                stages,
                *only_failed_stages,
                now,
            )?,
            ExecutionKind::Rollback { prior, mode, filter } => self.transform_rollback(prior, *mode, filter)?,
        };

        self.enter(BuildPhase::AssignExecutionId);
        let execution_id = Uuid::new_v4();

        self.enter(BuildPhase::ValidateStaticReferences);
        if self.config.validate_static_references {
            self.validator.validate(&transformed.validated)?;
        }

        self.enter(BuildPhase::BuildPlan);
        let mut plan = self.creator.create_plan(&transformed.compiled);

        if let Some(substitution) = &transformed.substitution {
            self.enter(BuildPhase::SubstituteIdentityNodes);
            let prior_nodes = match &request.kind {
                ExecutionKind::Retry { prior, .. } | ExecutionKind::Rollback { prior, .. } => prior.nodes.as_slice(),
                ExecutionKind::Fresh { .. } => &[],
            };
            plan = substitute_identity_nodes(&plan, prior_nodes, substitution)?;
        }

        self.enter(BuildPhase::Handoff);
        let handoff = ExecutionHandoff {
            metadata: ExecutionMetadata {
                execution_id,
                pipeline_identifier: pipeline.identifier.clone(),
                trigger_info,
                run_sequence: request.run_sequence,
                mode: transformed.mode,
                rerun_of: transformed.rerun_of,
                created_at: now,
            },
            plan_metadata: PlanExecutionMetadata {
                execution_id,
                raw_document: transformed.raw_document,
                processed_document: transformed.compiled.to_yaml()?,
                input_set_document: transformed.input_set_document,
                stages_selected: transformed.stages_selected,
                full_document_if_subset: transformed.full_document_if_subset,
            },
            plan,
            skip_set: transformed.skip_set,
            processed_document: transformed.processed.to_yaml()?,
        };

        info!(
            "Built {:?} execution {} of pipeline '{}' ({} nodes, {} reused stage(s))",
            handoff.metadata.mode,
            execution_id,
            pipeline.identifier,
            handoff.plan.nodes.len(),
            handoff.skip_set.len()
        );

        Ok(handoff)
    }

    fn transform_fresh(
        &self,
        pipeline: &PipelineEntity,
        merged_yaml: Option<&str>,
        input_set: Option<String>,
        stages_selected: &[String],
    ) -> Result<Transformed, PlanError> {
        let document = PipelineDocument::parse(merged_yaml.unwrap_or(&pipeline.yaml))?;

        let (compiled, stages, full_document) = if stages_selected.is_empty() {
            (document.clone(), None, None)
        } else {
            if !document.allow_stage_executions {
                return Err(PlanError::InvalidDocument(format!(
                    "pipeline '{}' does not allow running a subset of its stages",
                    document.identifier
                )));
            }
            if let Some(unknown) = stages_selected.iter().find(|id| !document.contains_stage(id)) {
                return Err(PlanError::InvalidDocument(format!(
                    "selected stage '{}' is not declared in pipeline '{}'",
                    unknown, document.identifier
                )));
            }
            let subset = document.retain_stages(|s| stages_selected.contains(&s.identifier));
            (subset, Some(stages_selected.to_vec()), Some(document.to_yaml()?))
        };

        Ok(Transformed {
            mode: ExecutionMode::Normal,
            rerun_of: None,
            processed: compiled.clone(),
            compiled,
            validated: document,
            skip_set: Vec::new(),
            substitution: None,
            raw_document: pipeline.yaml.clone(),
            input_set_document: input_set,
            stages_selected: stages,
            full_document_if_subset: full_document,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn transform_retry(
        &self,
        pipeline: &PipelineEntity,
        merged_yaml: Option<&str>,
        input_set: Option<String>,
        prior: &PriorExecution,
        stages: &[String],
        only_failed_stages: bool,
        now: DateTime<Utc>,
    ) -> Result<Transformed, PlanError> {
        check_retry_eligibility(
            &EligibilityCheck {
                pipeline_identifier: &pipeline.identifier,
                pipeline_exists: true,
                summary: &prior.summary,
                plan_metadata: prior.plan_metadata.as_ref(),
                now,
            },
            self.config.retry_window_days,
        )?;
        let prior_metadata = prior.plan_metadata.as_ref().ok_or_else(|| {
            PlanError::NotRetryable(format!(
                "No Plan Execution exists for id {}",
                prior.metadata.execution_id
            ))
        })?;

        let selection = if only_failed_stages {
            let failed = fetch_only_failed_stages(&prior.stages, stages)?;
            debug!("Narrowed retry selection to failed stages {:?}", failed);
            failed
        } else {
            stages.to_vec()
        };

        let document = PipelineDocument::parse(merged_yaml.unwrap_or(&pipeline.yaml))?;
        let previous = PipelineDocument::from_yaml(&prior_metadata.processed_document).map_err(|e| {
            PlanError::NotRetryable(format!("document of the failed execution is invalid: {}", e))
        })?;

        let current = match &prior_metadata.stages_selected {
            Some(subset) if prior_metadata.is_stage_subset() => {
                document.retain_stages(|s| subset.contains(&s.identifier))
            }
            _ => document.clone(),
        };

        let retry_plan = retry_processed_document(
            &current,
            &previous,
            &selection,
            self.config.parallel_retry_policy,
        )?;
        check_reusable_stages(&prior.stages, &retry_plan.skip_set)?;

        let full_document_if_subset = if prior_metadata.is_stage_subset() {
            Some(document.to_yaml()?)
        } else {
            None
        };

        Ok(Transformed {
            mode: ExecutionMode::Rerun,
            rerun_of: Some(prior.rerun_info()),
            substitution: Some(SubstitutionRequest::retry(
                retry_plan.skip_set.clone(),
                retry_plan.retry_stages.clone(),
            )),
            compiled: retry_plan.replay,
            processed: retry_plan.processed,
            validated: document,
            skip_set: retry_plan.skip_set,
            raw_document: pipeline.yaml.clone(),
            input_set_document: input_set,
            stages_selected: prior_metadata.stages_selected.clone(),
            full_document_if_subset,
        })
    }

    fn transform_rollback(
        &self,
        prior: &PriorExecution,
        mode: RollbackMode,
        filter: &StageFilter,
    ) -> Result<Transformed, PlanError> {
        let prior_metadata = prior.plan_metadata.as_ref().ok_or_else(|| {
            PlanError::NotRollbackable(format!(
                "No Plan Execution exists for id {}",
                prior.metadata.execution_id
            ))
        })?;

        let rollback = transform_for_rollback(&prior_metadata.processed_document, mode, &prior.stages, filter)?;

        Ok(Transformed {
            mode: rollback.mode,
            rerun_of: Some(prior.rerun_info()),
            substitution: Some(SubstitutionRequest::rollback(rollback.stages.clone(), rollback.mode)),
            processed: rollback.document.clone(),
            compiled: rollback.document,
            validated: rollback.source,
            skip_set: rollback.stages,
            raw_document: prior_metadata.raw_document.clone(),
            input_set_document: prior_metadata.input_set_document.clone(),
            stages_selected: None,
            full_document_if_subset: None,
        })
    }
}
