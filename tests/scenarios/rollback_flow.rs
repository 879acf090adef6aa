//! Rollbacks of prior executions through the plan builder

use crate::helpers::*;
use pretty_assertions::assert_eq;
use stageplan::core::{ExecutionMode, TriggerType};
use stageplan::plan::{SkipBehavior, StepCategory, TransitionRule};
use stageplan::{ErrorKind, ExecutionStatus, PlanError, PriorExecution, RollbackMode, StageFilter};

use ExecutionStatus::{Failed, NotStarted};

fn succeeded() -> PriorExecution {
    simulate_execution(&fresh_handoff(GOLDEN_PIPELINE), &[])
}

/// Golden run failing inside the first parallel block
fn failed_at_s4() -> PriorExecution {
    simulate_execution(
        &fresh_handoff(GOLDEN_PIPELINE),
        &[("s4", Failed), ("s6", NotStarted), ("s7", NotStarted), ("s8", NotStarted), ("s9", NotStarted)],
    )
}

/// Test rolling back every stage, last entry first
#[test]
fn test_reverse_all_rollback() {
    let prior = succeeded();
    let prior_id = prior.metadata.execution_id;
    let raw = prior.plan_metadata.as_ref().unwrap().raw_document.clone();

    let handoff = builder()
        .build_at(&rollback_request(prior, RollbackMode::ReverseAll, StageFilter::Executed), now())
        .unwrap();

    assert_eq!(handoff.metadata.mode, ExecutionMode::PipelineRollback);
    assert_eq!(handoff.metadata.trigger_info.trigger_type, TriggerType::Manual);
    assert_eq!(handoff.metadata.trigger_info.triggered_by, "carol");
    assert_eq!(handoff.metadata.rerun_of.as_ref().unwrap().previous_execution_id, prior_id);
    assert_eq!(handoff.plan_metadata.raw_document, raw);

    assert_eq!(
        skeleton_of(&handoff.processed_document),
        vec![
            parallel(&["s8", "s9"]),
            single("s7"),
            single("s6"),
            parallel(&["s3", "s4", "s5"]),
            single("s2"),
            single("s1"),
        ]
    );
    assert_eq!(handoff.skip_set, ids(&["s8", "s9", "s7", "s6", "s3", "s4", "s5", "s2", "s1"]));
}

/// Test that stages replay their rollback routing and rollback steps run
#[test]
fn test_rollback_replays_stages_and_runs_rollback_steps() {
    let handoff = builder()
        .build_at(&rollback_request(succeeded(), RollbackMode::ReverseAll, StageFilter::Executed), now())
        .unwrap();

    let s2 = handoff.plan.stage_node("pipeline.stages.s2").unwrap();
    let identity = s2.as_identity().expect("stage replays its prior execution");
    assert!(identity.replay_transition_rules);
    assert_eq!(identity.skip_behavior, SkipBehavior::AlreadySatisfied);

    let rollback_steps: Vec<_> = handoff
        .plan
        .nodes_of_stage("pipeline.stages.s2")
        .filter(|n| n.step_type().category == StepCategory::RollbackStep)
        .collect();
    assert_eq!(rollback_steps.len(), 1);
    assert!(!rollback_steps[0].is_identity());

    // The replayed rules route into the rollback steps instead of the steps
    assert_eq!(
        identity.transition_rules.first(),
        Some(&TransitionRule::Children(vec![rollback_steps[0].uuid().to_string()]))
    );
    assert!(!identity
        .transition_rules
        .iter()
        .any(|r| matches!(r, TransitionRule::OnFailure(_))));

    // Regular steps replay as well
    assert!(handoff
        .plan
        .nodes_of_stage("pipeline.stages.s2")
        .filter(|n| n.step_type().category == StepCategory::Step)
        .all(|n| n.is_identity()));
}

/// Test that only groups holding a failed stage are rolled back
#[test]
fn test_reverse_selected_failed_stages() {
    let handoff = builder()
        .build_at(&rollback_request(failed_at_s4(), RollbackMode::ReverseSelected, StageFilter::Failed), now())
        .unwrap();

    assert_eq!(handoff.metadata.mode, ExecutionMode::PostExecutionRollback);
    assert_eq!(skeleton_of(&handoff.processed_document), vec![parallel(&["s3", "s4", "s5"])]);
    assert_eq!(handoff.skip_set, ids(&["s3", "s4", "s5"]));
    assert!(handoff.plan.stage_node("pipeline.stages.s1").is_none());
}

/// Test rolling back named stages
#[test]
fn test_reverse_selected_named_stages() {
    let handoff = builder()
        .build_at(
            &rollback_request(
                succeeded(),
                RollbackMode::ReverseSelected,
                StageFilter::Identifiers(ids(&["s2", "s7"])),
            ),
            now(),
        )
        .unwrap();

    assert_eq!(skeleton_of(&handoff.processed_document), vec![single("s7"), single("s2")]);
}

/// Test rolling back only what ran
#[test]
fn test_reverse_selected_executed_stages() {
    let handoff = builder()
        .build_at(&rollback_request(failed_at_s4(), RollbackMode::ReverseSelected, StageFilter::Executed), now())
        .unwrap();

    assert_eq!(
        skeleton_of(&handoff.processed_document),
        vec![parallel(&["s3", "s4", "s5"]), single("s2"), single("s1")]
    );
}

/// Test that a filter matching nothing is rejected
#[test]
fn test_rollback_with_empty_selection() {
    let err = builder()
        .build_at(&rollback_request(succeeded(), RollbackMode::ReverseSelected, StageFilter::Failed), now())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptySelection);
}

/// Test rolling back an execution whose documents are unusable
#[test]
fn test_rollback_of_unusable_execution() {
    let mut corrupt = succeeded();
    if let Some(metadata) = corrupt.plan_metadata.as_mut() {
        metadata.processed_document = "pipeline: [".to_string();
    }
    let err = builder()
        .build_at(&rollback_request(corrupt, RollbackMode::ReverseAll, StageFilter::Executed), now())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotRollbackable);

    let mut forgotten = succeeded();
    forgotten.plan_metadata = None;
    let err = builder()
        .build_at(&rollback_request(forgotten, RollbackMode::ReverseAll, StageFilter::Executed), now())
        .unwrap_err();
    assert!(matches!(err, PlanError::NotRollbackable(ref m) if m.contains("No Plan Execution exists")));
}

/// Test that a stage without node history stays executable in a rollback
#[test]
fn test_rollback_keeps_stage_without_history() {
    let mut prior = succeeded();
    prior.nodes.retain(|n| n.stage_fqn.as_deref() != Some("pipeline.stages.s1"));

    let handoff = builder()
        .build_at(&rollback_request(prior, RollbackMode::ReverseAll, StageFilter::Executed), now())
        .unwrap();

    assert!(!handoff.plan.stage_node("pipeline.stages.s1").unwrap().is_identity());
    assert!(handoff.plan.stage_node("pipeline.stages.s2").unwrap().is_identity());
}

/// Test rolling back a retry execution
#[test]
fn test_rollback_of_a_retry() {
    let first = simulate_execution(
        &fresh_handoff(GOLDEN_PIPELINE),
        &[("s6", Failed), ("s7", NotStarted), ("s8", NotStarted), ("s9", NotStarted)],
    );
    let first_id = first.metadata.execution_id;
    let retry = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, first, &["s6"]), now())
        .unwrap();
    let second = simulate_execution(&retry, &[]);

    let handoff = builder()
        .build_at(&rollback_request(second, RollbackMode::ReverseAll, StageFilter::Executed), now())
        .unwrap();

    assert_eq!(handoff.metadata.rerun_of.as_ref().unwrap().root_execution_id, first_id);
    assert_eq!(stage_ids_of(&handoff.processed_document).len(), 9);
    assert_eq!(skeleton_of(&handoff.processed_document).first(), Some(&parallel(&["s8", "s9"])));
}
