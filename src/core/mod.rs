//! Core domain models
//!
//! This module defines the pipeline document model, execution state and
//! engine configuration shared by the plan, retry and rollback engines.

pub mod config;
pub mod document;
pub mod state;

pub use config::EngineConfig;
pub use document::*;
pub use state::*;
