//! CLI command definitions

use crate::rollback::{RollbackMode, StageFilter};
use clap::Args;

/// Validate a pipeline document
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,
}

/// Build the plan of a fresh run
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Path to a runtime input set YAML file
    #[arg(short, long)]
    pub inputs: Option<String>,

    /// Run only these stages (repeatable)
    #[arg(long = "stage")]
    pub stages: Vec<String>,

    /// Treat the pipeline as a draft
    #[arg(long)]
    pub draft: bool,

    #[command(flatten)]
    pub trigger: TriggerArgs,
}

/// Build the plan of a retry of a failed execution
#[derive(Debug, Args, Clone)]
pub struct RetryCommand {
    /// Path to the current pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Path to the prior execution JSON file
    #[arg(short, long)]
    pub prior: String,

    /// Stages to re-run (repeatable)
    #[arg(long = "stage", required = true)]
    pub stages: Vec<String>,

    /// Only re-run the selected stages that failed
    #[arg(long)]
    pub only_failed: bool,

    /// Path to a runtime input set YAML file
    #[arg(short, long)]
    pub inputs: Option<String>,

    #[command(flatten)]
    pub trigger: TriggerArgs,
}

/// Build the plan of a rollback of a prior execution
#[derive(Debug, Args, Clone)]
pub struct RollbackCommand {
    /// Path to the prior execution JSON file
    #[arg(short, long)]
    pub prior: String,

    /// Path to the pipeline YAML file; defaults to the prior raw document
    #[arg(short, long)]
    pub file: Option<String>,

    /// Rollback shape
    #[arg(long, value_enum, default_value_t = RollbackModeArg::ReverseAll)]
    pub mode: RollbackModeArg,

    /// Which stages a reverse-selected rollback covers
    #[arg(long, value_enum, default_value_t = StageFilterArg::Executed)]
    pub filter: StageFilterArg,

    /// Named stages, implies the identifiers filter (repeatable)
    #[arg(long = "stage")]
    pub stages: Vec<String>,

    #[command(flatten)]
    pub trigger: TriggerArgs,
}

/// Trigger details of a run
#[derive(Debug, Args, Clone)]
pub struct TriggerArgs {
    /// User starting the run
    #[arg(long, default_value = "cli")]
    pub triggered_by: String,

    /// Run number assigned to the run
    #[arg(long, default_value_t = 1)]
    pub run_sequence: u64,
}

/// Rollback mode argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RollbackModeArg {
    ReverseAll,
    ReverseSelected,
}

impl From<RollbackModeArg> for RollbackMode {
    fn from(arg: RollbackModeArg) -> Self {
        match arg {
            RollbackModeArg::ReverseAll => RollbackMode::ReverseAll,
            RollbackModeArg::ReverseSelected => RollbackMode::ReverseSelected,
        }
    }
}

/// Stage filter argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StageFilterArg {
    Executed,
    Failed,
}

impl RollbackCommand {
    /// Filter selected by the arguments; named stages win over `--filter`
    pub fn stage_filter(&self) -> StageFilter {
        if !self.stages.is_empty() {
            return StageFilter::Identifiers(self.stages.clone());
        }
        match self.filter {
            StageFilterArg::Executed => StageFilter::Executed,
            StageFilterArg::Failed => StageFilter::Failed,
        }
    }
}
