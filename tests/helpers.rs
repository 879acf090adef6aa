//! Test utility functions for stageplan
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use stageplan::core::{
    ExecutionStatus, ExecutionSummary, PipelineDocument, SkeletonEntry, StageRecord, TriggerInfo,
};
use stageplan::execution::{ExecutionHandoff, PipelineEntity};
use stageplan::plan::{NodeExecutionRecord, StepCategory};
use stageplan::rollback::{RollbackMode, StageFilter};
use stageplan::{EngineConfig, ExecutionKind, ExecutionPlanBuilder, ExecutionRequest, PriorExecution};
use std::collections::HashMap;

/// `[s1, s2, parallel{s3, s4, s5}, s6, s7, parallel{s8, s9}]`, each stage
/// with one step and one rollback step
pub const GOLDEN_PIPELINE: &str = r#"
pipeline:
  identifier: golden
  name: Golden
  stages:
    - stage:
        identifier: s1
        type: CI
        spec:
          execution:
            steps:
              - step:
                  identifier: build
                  type: Run
    - stage:
        identifier: s2
        type: Deployment
        spec:
          execution:
            steps:
              - step:
                  identifier: rollout
                  type: K8sRollingDeploy
            rollbackSteps:
              - step:
                  identifier: rollout_rollback
                  type: K8sRollingRollback
    - parallel:
        - stage:
            identifier: s3
            type: Deployment
            spec:
              execution:
                steps:
                  - step:
                      identifier: rollout
                      type: K8sRollingDeploy
                rollbackSteps:
                  - step:
                      identifier: rollout_rollback
                      type: K8sRollingRollback
        - stage:
            identifier: s4
            type: Deployment
            strategy:
              matrix:
                region: [eu, us]
            spec:
              execution:
                steps:
                  - step:
                      identifier: rollout
                      type: K8sRollingDeploy
        - stage:
            identifier: s5
            type: Approval
            spec:
              execution:
                steps:
                  - step:
                      identifier: approve
                      type: ManualApproval
    - stage:
        identifier: s6
        type: Custom
        spec:
          execution:
            steps:
              - step:
                  identifier: smoke
                  type: ShellScript
    - stage:
        identifier: s7
        type: Custom
        spec:
          execution:
            steps:
              - stepGroup:
                  identifier: checks
                  steps:
                    - step:
                        identifier: lint
                        type: ShellScript
                    - step:
                        identifier: audit
                        type: ShellScript
    - parallel:
        - stage:
            identifier: s8
            type: Custom
            spec:
              execution:
                steps:
                  - step:
                      identifier: notify
                      type: Http
        - stage:
            identifier: s9
            type: Custom
            spec:
              execution:
                steps:
                  - step:
                      identifier: report
                      type: Http
"#;

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub fn single(id: &str) -> SkeletonEntry {
    SkeletonEntry::Single(id.to_string())
}

pub fn parallel(members: &[&str]) -> SkeletonEntry {
    SkeletonEntry::Parallel(ids(members))
}

pub fn skeleton_of(yaml: &str) -> Vec<SkeletonEntry> {
    PipelineDocument::parse(yaml).unwrap().skeleton()
}

pub fn stage_ids_of(yaml: &str) -> Vec<String> {
    PipelineDocument::parse(yaml)
        .unwrap()
        .stage_identifiers()
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Fixed reference time used by the scenarios
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap()
}

pub fn record(identifier: &str, origin_id: &str, status: ExecutionStatus) -> StageRecord {
    StageRecord {
        identifier: identifier.to_string(),
        display_name: identifier.to_uppercase(),
        origin_id: origin_id.to_string(),
        next_id: None,
        status,
        started_at: now(),
    }
}

pub fn entity(yaml: &str) -> PipelineEntity {
    let identifier = PipelineDocument::from_yaml(yaml)
        .map(|d| d.identifier)
        .unwrap_or_else(|_| "pipeline".to_string());
    PipelineEntity {
        identifier,
        yaml: yaml.to_string(),
        draft: false,
    }
}

pub fn builder() -> ExecutionPlanBuilder {
    ExecutionPlanBuilder::new(EngineConfig::default())
}

pub fn fresh_request(yaml: &str) -> ExecutionRequest {
    ExecutionRequest {
        pipeline: entity(yaml),
        trigger: TriggerInfo::manual("alice"),
        run_sequence: 1,
        input_set: None,
        kind: ExecutionKind::Fresh {
            stages_selected: Vec::new(),
        },
    }
}

pub fn retry_request(yaml: &str, prior: PriorExecution, stages: &[&str]) -> ExecutionRequest {
    ExecutionRequest {
        pipeline: entity(yaml),
        trigger: TriggerInfo::manual("bob"),
        run_sequence: prior.metadata.run_sequence + 1,
        input_set: None,
        kind: ExecutionKind::Retry {
            prior,
            stages: ids(stages),
            only_failed_stages: false,
        },
    }
}

pub fn rollback_request(prior: PriorExecution, mode: RollbackMode, filter: StageFilter) -> ExecutionRequest {
    let yaml = prior
        .plan_metadata
        .as_ref()
        .map(|m| m.raw_document.clone())
        .unwrap_or_default();
    ExecutionRequest {
        pipeline: entity(&yaml),
        trigger: TriggerInfo::manual("carol"),
        run_sequence: prior.metadata.run_sequence + 1,
        input_set: None,
        kind: ExecutionKind::Rollback { prior, mode, filter },
    }
}

/// Build a fresh handoff as of [`now`]
pub fn fresh_handoff(yaml: &str) -> ExecutionHandoff {
    builder().build_at(&fresh_request(yaml), now()).unwrap()
}

/// Simulate the runtime executing a handoff
///
/// Every stage of the compiled document gets a stage record; stages listed
/// in `outcomes` take that status, the rest succeed. Stage records share an
/// origin per declared entry, and every node of a stage that ran gets a
/// node execution.
pub fn simulate_execution(handoff: &ExecutionHandoff, outcomes: &[(&str, ExecutionStatus)]) -> PriorExecution {
    let outcomes: HashMap<&str, ExecutionStatus> = outcomes.iter().copied().collect();
    let document = PipelineDocument::parse(&handoff.plan_metadata.processed_document).unwrap();

    let mut stages = Vec::new();
    for (index, entry) in document.entries.iter().enumerate() {
        for stage in entry.members() {
            let status = outcomes
                .get(stage.identifier.as_str())
                .copied()
                .unwrap_or(ExecutionStatus::Success);
            stages.push(record(&stage.identifier, &format!("origin{}", index), status));
        }
    }

    let status_of: HashMap<String, ExecutionStatus> =
        stages.iter().map(|r| (format!("pipeline.stages.{}", r.identifier), r.status)).collect();

    let nodes = handoff
        .plan
        .nodes
        .iter()
        .filter(|n| n.step_type().category != StepCategory::RollbackStep)
        .filter_map(|n| {
            let fqn = n.stage_fqn()?;
            let status = *status_of.get(fqn)?;
            status.has_run().then(|| NodeExecutionRecord {
                uuid: format!("{}-{}", handoff.metadata.execution_id, n.uuid()),
                plan_node_id: n.uuid().to_string(),
                identifier: n.identifier().to_string(),
                stage_fqn: Some(fqn.to_string()),
                step_type: n.step_type().clone(),
                status,
            })
        })
        .collect();

    let failed = stages.iter().any(|r| r.status.is_failed());
    PriorExecution {
        metadata: handoff.metadata.clone(),
        plan_metadata: Some(handoff.plan_metadata.clone()),
        summary: ExecutionSummary {
            execution_id: handoff.metadata.execution_id,
            status: if failed {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Success
            },
            is_latest_execution: true,
            created_at: handoff.metadata.created_at,
            rollback_execution_id: None,
        },
        stages,
        nodes,
    }
}

/// Age a prior execution by `days`
pub fn aged(mut prior: PriorExecution, days: i64) -> PriorExecution {
    prior.summary.created_at = prior.summary.created_at - Duration::days(days);
    prior.metadata.created_at = prior.summary.created_at;
    prior
}
