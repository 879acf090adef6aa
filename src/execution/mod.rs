//! Execution plan building

pub mod builder;
pub mod inputs;
pub mod references;

pub use builder::{
    BuildPhase, ExecutionHandoff, ExecutionKind, ExecutionPlanBuilder, ExecutionRequest, PhaseHandler,
    PipelineEntity, PriorExecution,
};
pub use inputs::{InputSetMerger, RuntimeInputMerger, RUNTIME_INPUT};
pub use references::{ExpressionReferenceValidator, StaticReferenceValidator};
