//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{PlanCommand, RetryCommand, RollbackCommand, ValidateCommand};
use std::ffi::OsString;

/// Execution plan builder for staged pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "stageplan")]
#[command(version = "0.1.0")]
#[command(about = "Build execution plans for pipeline runs, retries and rollbacks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to engine configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Validate a pipeline document
    Validate(ValidateCommand),

    /// Build the plan of a fresh run
    Plan(PlanCommand),

    /// Build the plan of a retry
    Retry(RetryCommand),

    /// Build the plan of a rollback
    Rollback(RollbackCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
