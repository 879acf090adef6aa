//! Retries of failed executions through the plan builder

use crate::helpers::*;
use pretty_assertions::assert_eq;
use stageplan::core::{ExecutionMode, TriggerType};
use stageplan::plan::{SkipBehavior, StepCategory};
use stageplan::{ErrorKind, ExecutionKind, ExecutionStatus, PlanError, PriorExecution};

use ExecutionStatus::{Failed, NotStarted};

/// Golden run failing at s6
fn failed_at_s6() -> PriorExecution {
    simulate_execution(
        &fresh_handoff(GOLDEN_PIPELINE),
        &[("s6", Failed), ("s7", NotStarted), ("s8", NotStarted), ("s9", NotStarted)],
    )
}

/// Test that a retry reuses every stage before the selected one
#[test]
fn test_retry_from_failed_stage() {
    let prior = failed_at_s6();
    let prior_id = prior.metadata.execution_id;

    let handoff = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, prior, &["s6"]), now())
        .unwrap();

    assert_eq!(handoff.metadata.mode, ExecutionMode::Rerun);
    assert_ne!(handoff.metadata.execution_id, prior_id);
    assert_eq!(handoff.metadata.trigger_info.trigger_type, TriggerType::Manual);
    assert_eq!(handoff.metadata.trigger_info.triggered_by, "bob");
    assert_eq!(handoff.metadata.run_sequence, 2);

    let rerun = handoff.metadata.rerun_of.as_ref().unwrap();
    assert_eq!(rerun.root_execution_id, prior_id);
    assert_eq!(rerun.previous_execution_id, prior_id);

    assert_eq!(handoff.skip_set, ids(&["s1", "s2", "s3", "s4", "s5"]));
    assert_eq!(
        skeleton_of(&handoff.processed_document),
        vec![single("s6"), single("s7"), parallel(&["s8", "s9"])]
    );
    // The compiled plan still covers the whole pipeline
    assert_eq!(skeleton_of(&handoff.plan_metadata.processed_document), skeleton_of(GOLDEN_PIPELINE));
}

/// Test that reused stages replay the prior node executions they match
#[test]
fn test_identity_nodes_reference_prior_executions() {
    let prior = failed_at_s6();
    let history = prior.nodes.clone();

    let handoff = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, prior, &["s6"]), now())
        .unwrap();

    for id in ["s1", "s2", "s3", "s4", "s5"] {
        let fqn = format!("pipeline.stages.{}", id);
        let node = handoff.plan.stage_node(&fqn).unwrap();
        assert!(node.is_identity(), "stage {} should be reused", id);
    }

    for identity in handoff.plan.identity_nodes() {
        let original = history
            .iter()
            .find(|r| r.uuid == identity.original_execution_ref)
            .unwrap_or_else(|| panic!("no prior execution for {}", identity.identifier));
        assert_eq!(original.stage_fqn, identity.stage_fqn);
        assert_eq!(original.identifier, identity.identifier);
        assert_eq!(original.step_type.category, identity.step_type.category);
        assert_eq!(identity.skip_behavior, SkipBehavior::AlreadySatisfied);
        assert!(!identity.replay_transition_rules);
    }

    // Selected and later stages execute
    for id in ["s6", "s7", "s8", "s9"] {
        let fqn = format!("pipeline.stages.{}", id);
        assert!(handoff.plan.nodes_of_stage(&fqn).all(|n| !n.is_identity()));
    }

    // Matrix stage replays its strategy instance too
    let strategy = handoff
        .plan
        .nodes_by_identifier("s4")
        .find(|n| n.step_type().category == StepCategory::Strategy)
        .unwrap();
    assert!(strategy.is_identity());
}

/// Test that the chain root survives a retry of a retry
#[test]
fn test_retry_of_a_retry() {
    let first = failed_at_s6();
    let first_id = first.metadata.execution_id;

    let second_handoff = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, first, &["s6"]), now())
        .unwrap();
    let second = simulate_execution(
        &second_handoff,
        &[("s7", Failed), ("s8", NotStarted), ("s9", NotStarted)],
    );
    let second_id = second.metadata.execution_id;

    let third = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, second, &["s7"]), now())
        .unwrap();

    let rerun = third.metadata.rerun_of.as_ref().unwrap();
    assert_eq!(rerun.root_execution_id, first_id);
    assert_eq!(rerun.previous_execution_id, second_id);
    assert_eq!(third.metadata.run_sequence, 3);
    assert_eq!(third.skip_set, ids(&["s1", "s2", "s3", "s4", "s5", "s6"]));

    // s6 ran in the second execution, so that is what gets replayed
    let s6 = third.plan.stage_node("pipeline.stages.s6").unwrap();
    let reference = &s6.as_identity().unwrap().original_execution_ref;
    assert!(reference.starts_with(&second_id.to_string()));
}

/// Test that reused stages keep their prior bodies while re-run stages
/// pick up edits
#[test]
fn test_retry_after_stage_body_edits() {
    let prior = failed_at_s6();
    let edited = GOLDEN_PIPELINE
        .replace("identifier: build", "identifier: compile")
        .replace("identifier: smoke", "identifier: smoke_v2");

    let handoff = builder()
        .build_at(&retry_request(&edited, prior, &["s6"]), now())
        .unwrap();

    let s1_steps: Vec<&str> = handoff
        .plan
        .nodes_of_stage("pipeline.stages.s1")
        .filter(|n| n.step_type().category == StepCategory::Step)
        .map(|n| n.identifier())
        .collect();
    assert_eq!(s1_steps, vec!["build"]);

    let s6_steps: Vec<&str> = handoff
        .plan
        .nodes_of_stage("pipeline.stages.s6")
        .filter(|n| n.step_type().category == StepCategory::Step)
        .map(|n| n.identifier())
        .collect();
    assert_eq!(s6_steps, vec!["smoke_v2"]);
    assert!(handoff.processed_document.contains("smoke_v2"));
}

/// Test that a selection after the failed stage cannot reuse it
#[test]
fn test_retry_cannot_reuse_failed_stage() {
    let err = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, failed_at_s6(), &["s7"]), now())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidRetrySelection);
    assert!(err.to_string().contains("'s6'"), "{}", err);
}

/// Test that a changed stage list cannot be retried
#[test]
fn test_retry_after_stage_list_change() {
    let prior = failed_at_s6();
    let renamed = GOLDEN_PIPELINE.replace("identifier: s7", "identifier: s7b");

    let err = builder()
        .build_at(&retry_request(&renamed, prior, &["s6"]), now())
        .unwrap_err();

    match err {
        PlanError::NotRetryable(message) => assert!(message.contains("s7b"), "{}", message),
        other => panic!("unexpected error: {:?}", other),
    }
}

/// Test narrowing a selection to the stages that failed
#[test]
fn test_retry_only_failed_stages() {
    let prior = simulate_execution(
        &fresh_handoff(GOLDEN_PIPELINE),
        &[
            ("s3", Failed),
            ("s5", Failed),
            ("s6", NotStarted),
            ("s7", NotStarted),
            ("s8", NotStarted),
            ("s9", NotStarted),
        ],
    );
    let mut request = retry_request(GOLDEN_PIPELINE, prior, &["s5", "s4", "s3"]);
    if let ExecutionKind::Retry { only_failed_stages, .. } = &mut request.kind {
        *only_failed_stages = true;
    }

    let handoff = builder().build_at(&request, now()).unwrap();

    assert_eq!(handoff.skip_set, ids(&["s1", "s2", "s4"]));
    assert_eq!(
        skeleton_of(&handoff.processed_document),
        vec![
            parallel(&["s3", "s5"]),
            single("s6"),
            single("s7"),
            parallel(&["s8", "s9"]),
        ]
    );
}

/// Test that a retry without inputs reuses the prior input set
#[test]
fn test_retry_reuses_prior_input_set() {
    let pipeline = r#"
pipeline:
  identifier: release
  stages:
    - stage:
        identifier: build
        spec:
          command: <+input>
    - stage:
        identifier: deploy
"#;
    let input_set = r#"
pipeline:
  identifier: release
  stages:
    - stage:
        identifier: build
        spec:
          command: make
"#;
    let mut request = fresh_request(pipeline);
    request.input_set = Some(input_set.to_string());
    let fresh = builder().build_at(&request, now()).unwrap();
    let prior = simulate_execution(&fresh, &[("deploy", Failed)]);

    let handoff = builder()
        .build_at(&retry_request(pipeline, prior, &["deploy"]), now())
        .unwrap();

    assert_eq!(handoff.plan_metadata.input_set_document.as_deref(), Some(input_set));
    assert_eq!(handoff.skip_set, ids(&["build"]));
}

/// Test retrying an execution that ran a subset of stages
#[test]
fn test_retry_of_stage_subset_execution() {
    let pipeline = r#"
pipeline:
  identifier: subset
  allowStageExecutions: true
  stages:
    - stage:
        identifier: a
    - stage:
        identifier: b
    - stage:
        identifier: c
"#;
    let mut request = fresh_request(pipeline);
    request.kind = ExecutionKind::Fresh {
        stages_selected: ids(&["b", "c"]),
    };
    let fresh = builder().build_at(&request, now()).unwrap();
    let prior = simulate_execution(&fresh, &[("c", Failed)]);

    let handoff = builder()
        .build_at(&retry_request(pipeline, prior, &["c"]), now())
        .unwrap();

    assert_eq!(handoff.skip_set, ids(&["b"]));
    assert_eq!(skeleton_of(&handoff.processed_document), vec![single("c")]);
    assert_eq!(handoff.plan_metadata.stages_selected, Some(ids(&["b", "c"])));
    assert_eq!(
        stage_ids_of(handoff.plan_metadata.full_document_if_subset.as_deref().unwrap()),
        ids(&["a", "b", "c"])
    );
    assert!(handoff.plan.stage_node("pipeline.stages.a").is_none());
}

/// Test the preconditions on the prior execution
#[test]
fn test_retry_eligibility() {
    let stale = aged(failed_at_s6(), 31);
    let err = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, stale, &["s6"]), now())
        .unwrap_err();
    assert!(matches!(err, PlanError::NotRetryable(ref m) if m == "Execution is more than 30 days old. Cannot retry"));

    let mut superseded = failed_at_s6();
    superseded.summary.is_latest_execution = false;
    let err = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, superseded, &["s6"]), now())
        .unwrap_err();
    assert!(matches!(err, PlanError::NotRetryable(ref m) if m.contains("only retry the latest execution")));

    let mut rolled_back = failed_at_s6();
    rolled_back.summary.rollback_execution_id = Some(uuid::Uuid::new_v4());
    let err = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, rolled_back, &["s6"]), now())
        .unwrap_err();
    assert!(matches!(err, PlanError::NotRetryable(ref m) if m.contains("Pipeline Rollback")));
}

/// Test selections naming no known stage
#[test]
fn test_retry_with_unknown_stage() {
    let err = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, failed_at_s6(), &["s42"]), now())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRetrySelection);
}

/// Test that a reused stage without node history cannot be replayed
#[test]
fn test_retry_without_node_history() {
    let mut prior = failed_at_s6();
    prior.nodes.retain(|n| n.stage_fqn.as_deref() != Some("pipeline.stages.s2"));

    let err = builder()
        .build_at(&retry_request(GOLDEN_PIPELINE, prior, &["s6"]), now())
        .unwrap_err();

    match err {
        PlanError::MissingHistoryReference { identifier, stage_fqn } => {
            assert_eq!(identifier, "s2");
            assert_eq!(stage_fqn, "pipeline.stages.s2");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
