//! stageplan - execution plan, retry and rollback engine for staged pipelines

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod plan;
pub mod retry;
pub mod rollback;

// Re-export commonly used types
pub use core::{EngineConfig, ExecutionMode, ExecutionStatus, PipelineDocument, StageEntry, StageRecord};
pub use error::{ErrorKind, PlanError};
pub use execution::{ExecutionHandoff, ExecutionKind, ExecutionPlanBuilder, ExecutionRequest, PriorExecution};
pub use plan::{Node, Plan, PlanCreator};
pub use retry::{group_stage_records, retry_processed_document, ParallelRetryPolicy, RetryGroup};
pub use rollback::{transform_for_rollback, RollbackMode, StageFilter};
