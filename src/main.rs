use anyhow::{Context, Result};
use stageplan::cli::commands::{PlanCommand, RetryCommand, RollbackCommand, TriggerArgs, ValidateCommand};
use stageplan::cli::output::*;
use stageplan::cli::{Cli, Command};
use stageplan::core::{ExecutionMetadata, TriggerInfo, TriggerType};
use stageplan::execution::{ExecutionHandoff, PipelineEntity};
use stageplan::retry::RetryInfo;
use stageplan::{
    EngineConfig, ExecutionKind, ExecutionPlanBuilder, ExecutionRequest, PipelineDocument, PlanError, PriorExecution,
};
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load engine config from {}", path))?,
        None => EngineConfig::default(),
    };

    match &cli.command {
        Command::Validate(cmd) => validate_pipeline(cmd, &cli)?,
        Command::Plan(cmd) => plan_run(cmd, &cli, config)?,
        Command::Retry(cmd) => plan_retry(cmd, &cli, config)?,
        Command::Rollback(cmd) => plan_rollback(cmd, &cli, config)?,
    }

    Ok(())
}

fn read_file(path: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))
}

fn load_prior(path: &str) -> Result<PriorExecution> {
    let content = read_file(path)?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse prior execution from {}", path))
}

fn trigger_info(args: &TriggerArgs) -> TriggerInfo {
    TriggerInfo {
        trigger_type: TriggerType::Manual,
        triggered_by: args.triggered_by.clone(),
    }
}

fn read_inputs(path: Option<&String>) -> Result<Option<String>> {
    path.map(|p| read_file(p)).transpose()
}

fn builder(config: EngineConfig, cli: &Cli) -> ExecutionPlanBuilder {
    let builder = ExecutionPlanBuilder::new(config);
    if cli.verbose && !cli.json {
        builder.with_phase_handler(|phase| println!("{}", format_phase(phase)))
    } else {
        builder
    }
}

fn validate_pipeline(cmd: &ValidateCommand, cli: &Cli) -> Result<()> {
    if !cli.json {
        println!("{} Validating pipeline...", INFO);
    }

    let yaml = read_file(&cmd.file)?;
    match PipelineDocument::parse(&yaml) {
        Ok(document) => {
            if cli.json {
                let json = serde_json::to_string_pretty(&document.to_value())?;
                println!("{}", json);
                return Ok(());
            }
            println!("{} Pipeline document is valid!", CHECK);
            println!("  Identifier: {}", style(&document.identifier).bold());
            println!("  Stages: {}", style(document.stages().count()).cyan());
            for line in format_skeleton(&document) {
                println!("{}", line);
            }
            Ok(())
        }
        Err(e) => fail(e),
    }
}

fn plan_run(cmd: &PlanCommand, cli: &Cli, config: EngineConfig) -> Result<()> {
    let yaml = read_file(&cmd.file)?;
    let identifier = PipelineDocument::from_yaml(&yaml)
        .map(|d| d.identifier)
        .unwrap_or_else(|_| cmd.file.clone());

    let request = ExecutionRequest {
        pipeline: PipelineEntity {
            identifier,
            yaml,
            draft: cmd.draft,
        },
        trigger: trigger_info(&cmd.trigger),
        run_sequence: cmd.trigger.run_sequence,
        input_set: read_inputs(cmd.inputs.as_ref())?,
        kind: ExecutionKind::Fresh {
            stages_selected: cmd.stages.clone(),
        },
    };

    finish(builder(config, cli).build(&request), cli)
}

fn plan_retry(cmd: &RetryCommand, cli: &Cli, config: EngineConfig) -> Result<()> {
    let prior = load_prior(&cmd.prior)?;

    if !cli.json {
        println!(
            "{} Retrying execution {} ({})",
            INFO,
            style(prior.metadata.execution_id).dim(),
            format_status(prior.summary.status)
        );
        let info = RetryInfo::from_records(&prior.stages);
        match &info.error_message {
            Some(message) => println!("{} {}", WARN, message),
            None => {
                for (index, group) in info.groups.iter().enumerate() {
                    println!("  {}. {}", index + 1, style(group.identifiers().join(", ")).cyan());
                }
            }
        }
    }

    let request = ExecutionRequest {
        pipeline: PipelineEntity {
            identifier: prior.metadata.pipeline_identifier.clone(),
            yaml: read_file(&cmd.file)?,
            draft: false,
        },
        trigger: trigger_info(&cmd.trigger),
        run_sequence: cmd.trigger.run_sequence,
        input_set: read_inputs(cmd.inputs.as_ref())?,
        kind: ExecutionKind::Retry {
            prior,
            stages: cmd.stages.clone(),
            only_failed_stages: cmd.only_failed,
        },
    };

    finish(builder(config, cli).build(&request), cli)
}

fn plan_rollback(cmd: &RollbackCommand, cli: &Cli, config: EngineConfig) -> Result<()> {
    let prior = load_prior(&cmd.prior)?;
    let yaml = match &cmd.file {
        Some(path) => read_file(path)?,
        None => prior
            .plan_metadata
            .as_ref()
            .map(|m| m.raw_document.clone())
            .with_context(|| no_documents(&prior.metadata))?,
    };

    let request = ExecutionRequest {
        pipeline: PipelineEntity {
            identifier: prior.metadata.pipeline_identifier.clone(),
            yaml,
            draft: false,
        },
        trigger: trigger_info(&cmd.trigger),
        run_sequence: cmd.trigger.run_sequence,
        input_set: None,
        kind: ExecutionKind::Rollback {
            filter: cmd.stage_filter(),
            mode: cmd.mode.into(),
            prior,
        },
    };

    finish(builder(config, cli).build(&request), cli)
}

fn no_documents(metadata: &ExecutionMetadata) -> String {
    format!("Execution {} has no recorded documents", metadata.execution_id)
}

fn finish(result: Result<ExecutionHandoff, PlanError>, cli: &Cli) -> Result<()> {
    match result {
        Ok(handoff) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&handoff)?);
            } else {
                for line in format_handoff(&handoff) {
                    println!("{}", line);
                }
            }
            Ok(())
        }
        Err(e) => fail(e),
    }
}

fn fail(e: PlanError) -> Result<()> {
    println!("{} {} [{}]", CROSS, style(&e).red(), style(e.kind()).dim());
    error!("{}", e);
    std::process::exit(1);
}
