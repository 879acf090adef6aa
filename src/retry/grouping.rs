//! Reconstruction of serial/parallel grouping from stage records

use crate::core::StageRecord;
use serde::{Deserialize, Serialize};

/// Stages that ran together: one member for a serial stage, several for a
/// parallel block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryGroup {
    /// Records in execution order
    pub members: Vec<StageRecord>,
}

impl RetryGroup {
    pub fn is_parallel(&self) -> bool {
        self.members.len() > 1
    }

    /// Origin shared by every member
    pub fn origin_id(&self) -> Option<&str> {
        self.members.first().map(|m| m.origin_id.as_str())
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.identifier.as_str()).collect()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.members.iter().any(|m| m.identifier == identifier)
    }
}

/// Group records in one pass: consecutive records with the same origin
/// belong to the same group
pub fn group_stage_records(records: &[StageRecord]) -> Vec<RetryGroup> {
    let mut groups: Vec<RetryGroup> = Vec::new();

    for record in records {
        match groups.last_mut() {
            Some(group) if group.origin_id() == Some(record.origin_id.as_str()) => {
                group.members.push(record.clone());
            }
            _ => groups.push(RetryGroup {
                members: vec![record.clone()],
            }),
        }
    }

    groups
}

/// Flatten groups back into the record list they were built from
pub fn flatten_groups(groups: &[RetryGroup]) -> Vec<StageRecord> {
    groups.iter().flat_map(|g| g.members.iter().cloned()).collect()
}

/// Retry groups of an execution, as offered to a user picking stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInfo {
    /// Whether the execution can be retried at all
    pub resumable: bool,

    /// Why the execution cannot be retried
    #[serde(default)]
    pub error_message: Option<String>,

    #[serde(default)]
    pub groups: Vec<RetryGroup>,
}

impl RetryInfo {
    pub fn from_records(records: &[StageRecord]) -> Self {
        if records.is_empty() {
            return Self::not_resumable("No stage executions found for this execution");
        }
        Self {
            resumable: true,
            error_message: None,
            groups: group_stage_records(records),
        }
    }

    pub fn not_resumable(message: impl Into<String>) -> Self {
        Self {
            resumable: false,
            error_message: Some(message.into()),
            groups: Vec::new(),
        }
    }
}
