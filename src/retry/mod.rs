//! Retry of failed executions
//!
//! Grouping of historical stage records, the retry plan transformation and
//! the preconditions a prior execution must satisfy before it can be retried.

pub mod eligibility;
pub mod grouping;
pub mod transformer;

pub use eligibility::{
    check_retry_eligibility, check_reusable_stages, fetch_only_failed_stages, retry_history, EligibilityCheck, RetryHistory,
};
pub use grouping::{flatten_groups, group_stage_records, RetryGroup, RetryInfo};
pub use transformer::{retry_processed_document, validate_retry, ParallelRetryPolicy, RetryPlan};
