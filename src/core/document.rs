//! Stage graph model over a pipeline document
//!
//! A pipeline document is an ordered list of entries, each either a single
//! stage or a parallel block of stages. Stage bodies are kept as opaque YAML
//! mappings; only the stage list shape is interpreted here.

use crate::error::PlanError;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

const PIPELINE_KEY: &str = "pipeline";
const STAGES_KEY: &str = "stages";
const STAGE_KEY: &str = "stage";
const PARALLEL_KEY: &str = "parallel";
const IDENTIFIER_KEY: &str = "identifier";
const NAME_KEY: &str = "name";
const ALLOW_PARALLEL_KEY: &str = "allowParallel";
const ALLOW_STAGE_EXECUTIONS_KEY: &str = "allowStageExecutions";

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z_][0-9a-zA-Z_]{0,127}$").expect("identifier pattern is valid")
    })
}

/// Fully qualified name of a stage inside the document hierarchy
pub fn stage_fqn(identifier: &str) -> String {
    format!("{}.{}.{}", PIPELINE_KEY, STAGES_KEY, identifier)
}

/// A single declared stage
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Unique stage identifier
    pub identifier: String,

    /// Display name, if declared
    pub name: Option<String>,

    /// Full stage mapping as declared (includes the identifier)
    pub body: Mapping,
}

impl Stage {
    /// Create a stage from its declared mapping
    pub fn from_mapping(body: Mapping) -> Result<Self, PlanError> {
        let identifier = body
            .get(IDENTIFIER_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| PlanError::InvalidDocument("stage is missing an 'identifier'".to_string()))?
            .to_string();
        let name = body.get(NAME_KEY).and_then(Value::as_str).map(str::to_string);

        Ok(Stage {
            identifier,
            name,
            body,
        })
    }

    /// Declared stage type (e.g. `Deployment`, `CI`)
    pub fn stage_type(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    /// Whether the stage declares a looping/matrix strategy
    pub fn has_strategy(&self) -> bool {
        matches!(self.body.get("strategy"), Some(v) if !v.is_null())
    }

    /// Fully qualified name of this stage
    pub fn fqn(&self) -> String {
        stage_fqn(&self.identifier)
    }

    fn to_value(&self) -> Value {
        let mut wrapper = Mapping::new();
        wrapper.insert(Value::from(STAGE_KEY), Value::Mapping(self.body.clone()));
        Value::Mapping(wrapper)
    }
}

/// One entry of the stage list
#[derive(Debug, Clone, PartialEq)]
pub enum StageEntry {
    /// A stage running on its own
    Single(Stage),
    /// Stages sharing a common predecessor, running concurrently
    Parallel(Vec<Stage>),
}

impl StageEntry {
    /// Stages of this entry in declared order
    pub fn members(&self) -> &[Stage] {
        match self {
            StageEntry::Single(stage) => std::slice::from_ref(stage),
            StageEntry::Parallel(stages) => stages,
        }
    }

    /// Whether the entry is a parallel block
    pub fn is_parallel(&self) -> bool {
        matches!(self, StageEntry::Parallel(_))
    }

    /// Whether the entry holds the given stage
    pub fn contains(&self, identifier: &str) -> bool {
        self.members().iter().any(|s| s.identifier == identifier)
    }

    /// Identifiers of this entry in declared order
    pub fn identifiers(&self) -> Vec<&str> {
        self.members().iter().map(|s| s.identifier.as_str()).collect()
    }

    /// Build an entry from a list of stages, collapsing a one-member block
    ///
    /// Returns `None` for an empty list.
    pub fn from_stages(mut stages: Vec<Stage>) -> Option<Self> {
        match stages.len() {
            0 => None,
            1 => stages.pop().map(StageEntry::Single),
            _ => Some(StageEntry::Parallel(stages)),
        }
    }

    fn skeleton(&self) -> SkeletonEntry {
        match self {
            StageEntry::Single(stage) => SkeletonEntry::Single(stage.identifier.clone()),
            StageEntry::Parallel(stages) => {
                SkeletonEntry::Parallel(stages.iter().map(|s| s.identifier.clone()).collect())
            }
        }
    }

    fn to_value(&self) -> Value {
        match self {
            StageEntry::Single(stage) => stage.to_value(),
            StageEntry::Parallel(stages) => {
                let mut wrapper = Mapping::new();
                wrapper.insert(
                    Value::from(PARALLEL_KEY),
                    Value::Sequence(stages.iter().map(Stage::to_value).collect()),
                );
                Value::Mapping(wrapper)
            }
        }
    }

    fn from_value(value: &Value) -> Result<Self, PlanError> {
        let mapping = value.as_mapping().ok_or_else(|| {
            PlanError::InvalidDocument("stage list entries must be mappings".to_string())
        })?;

        if let Some(stage) = mapping.get(STAGE_KEY) {
            let body = stage.as_mapping().cloned().ok_or_else(|| {
                PlanError::InvalidDocument("'stage' must be a mapping".to_string())
            })?;
            return Ok(StageEntry::Single(Stage::from_mapping(body)?));
        }

        if let Some(parallel) = mapping.get(PARALLEL_KEY) {
            let items = parallel.as_sequence().ok_or_else(|| {
                PlanError::InvalidDocument("'parallel' must be a list of stages".to_string())
            })?;
            let stages = items
                .iter()
                .map(|item| {
                    item.get(STAGE_KEY)
                        .and_then(Value::as_mapping)
                        .cloned()
                        .ok_or_else(|| {
                            PlanError::InvalidDocument(
                                "'parallel' may only contain 'stage' entries".to_string(),
                            )
                        })
                        .and_then(Stage::from_mapping)
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(StageEntry::Parallel(stages));
        }

        Err(PlanError::InvalidDocument(
            "stage list entry must be either 'stage' or 'parallel'".to_string(),
        ))
    }
}

/// Shape of the stage list with bodies stripped
///
/// Two documents with equal skeletons differ only inside stage bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkeletonEntry {
    Single(String),
    Parallel(Vec<String>),
}

impl fmt::Display for SkeletonEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkeletonEntry::Single(id) => write!(f, "{}", id),
            SkeletonEntry::Parallel(ids) => write!(f, "parallel[{}]", ids.join(", ")),
        }
    }
}

/// A pipeline document: metadata plus the ordered stage list
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDocument {
    /// Pipeline identifier
    pub identifier: String,

    /// Pipeline display name
    pub name: Option<String>,

    /// Whether parallel blocks are permitted
    pub allow_parallel: bool,

    /// Whether a run may select a subset of stages
    pub allow_stage_executions: bool,

    /// Ordered stage list
    pub entries: Vec<StageEntry>,

    /// Remaining pipeline fields, preserved verbatim
    pub extra: Mapping,
}

impl PipelineDocument {
    /// Parse a document from YAML without validating it
    pub fn from_yaml(yaml: &str) -> Result<Self, PlanError> {
        let root: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(&root)
    }

    /// Parse and validate a document from YAML
    pub fn parse(yaml: &str) -> Result<Self, PlanError> {
        let document = Self::from_yaml(yaml)?;
        document.validate()?;
        Ok(document)
    }

    /// Build a document from an already parsed YAML value
    pub fn from_value(root: &Value) -> Result<Self, PlanError> {
        let pipeline = root
            .get(PIPELINE_KEY)
            .and_then(Value::as_mapping)
            .ok_or_else(|| {
                PlanError::InvalidDocument("missing top-level 'pipeline' mapping".to_string())
            })?;

        let identifier = pipeline
            .get(IDENTIFIER_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                PlanError::InvalidDocument("pipeline is missing an 'identifier'".to_string())
            })?
            .to_string();

        let entries = match pipeline.get(STAGES_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(StageEntry::from_value)
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(PlanError::InvalidDocument(
                    "'stages' must be a list".to_string(),
                ))
            }
        };

        let mut extra = Mapping::new();
        for (key, value) in pipeline {
            match key.as_str() {
                Some(IDENTIFIER_KEY | NAME_KEY | ALLOW_PARALLEL_KEY | ALLOW_STAGE_EXECUTIONS_KEY | STAGES_KEY) => {}
                _ => {
                    extra.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(PipelineDocument {
            identifier,
            name: pipeline.get(NAME_KEY).and_then(Value::as_str).map(str::to_string),
            allow_parallel: pipeline
                .get(ALLOW_PARALLEL_KEY)
                .and_then(Value::as_bool)
                .unwrap_or(true),
            allow_stage_executions: pipeline
                .get(ALLOW_STAGE_EXECUTIONS_KEY)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            entries,
            extra,
        })
    }

    /// Validate structural rules of the stage list
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut seen = HashSet::new();

        for entry in &self.entries {
            if let StageEntry::Parallel(stages) = entry {
                if stages.is_empty() {
                    return Err(PlanError::InvalidDocument(
                        "parallel block must contain at least one stage".to_string(),
                    ));
                }
                if !self.allow_parallel {
                    return Err(PlanError::InvalidDocument(format!(
                        "pipeline '{}' does not allow parallel stages",
                        self.identifier
                    )));
                }
            }

            for stage in entry.members() {
                if !identifier_pattern().is_match(&stage.identifier) {
                    return Err(PlanError::InvalidDocument(format!(
                        "invalid stage identifier '{}'",
                        stage.identifier
                    )));
                }
                if !seen.insert(stage.identifier.as_str()) {
                    return Err(PlanError::InvalidDocument(format!(
                        "duplicate stage identifier '{}'",
                        stage.identifier
                    )));
                }
            }
        }

        Ok(())
    }

    /// Serialize back into the `pipeline:` YAML shape
    pub fn to_value(&self) -> Value {
        let mut pipeline = Mapping::new();
        pipeline.insert(Value::from(IDENTIFIER_KEY), Value::from(self.identifier.clone()));
        if let Some(name) = &self.name {
            pipeline.insert(Value::from(NAME_KEY), Value::from(name.clone()));
        }
        if !self.allow_parallel {
            pipeline.insert(Value::from(ALLOW_PARALLEL_KEY), Value::Bool(false));
        }
        if self.allow_stage_executions {
            pipeline.insert(Value::from(ALLOW_STAGE_EXECUTIONS_KEY), Value::Bool(true));
        }
        for (key, value) in &self.extra {
            pipeline.insert(key.clone(), value.clone());
        }
        pipeline.insert(
            Value::from(STAGES_KEY),
            Value::Sequence(self.entries.iter().map(StageEntry::to_value).collect()),
        );

        let mut root = Mapping::new();
        root.insert(Value::from(PIPELINE_KEY), Value::Mapping(pipeline));
        Value::Mapping(root)
    }

    /// Serialize to a YAML string
    pub fn to_yaml(&self) -> Result<String, PlanError> {
        Ok(serde_yaml::to_string(&self.to_value())?)
    }

    /// All stages in declared order
    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.entries.iter().flat_map(|e| e.members().iter())
    }

    /// All stage identifiers in declared order
    pub fn stage_identifiers(&self) -> Vec<&str> {
        self.stages().map(|s| s.identifier.as_str()).collect()
    }

    /// Look up a stage by identifier
    pub fn stage(&self, identifier: &str) -> Option<&Stage> {
        self.stages().find(|s| s.identifier == identifier)
    }

    /// Whether the document declares the given stage
    pub fn contains_stage(&self, identifier: &str) -> bool {
        self.stage(identifier).is_some()
    }

    /// Index of the entry holding the given stage
    pub fn entry_index_of(&self, identifier: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.contains(identifier))
    }

    /// Shape of the stage list
    pub fn skeleton(&self) -> Vec<SkeletonEntry> {
        self.entries.iter().map(StageEntry::skeleton).collect()
    }

    /// Copy of this document with a different stage list
    pub fn with_entries(&self, entries: Vec<StageEntry>) -> Self {
        PipelineDocument {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            allow_parallel: self.allow_parallel,
            allow_stage_executions: self.allow_stage_executions,
            entries,
            extra: self.extra.clone(),
        }
    }

    /// Keep only the stages matching `keep`, preserving order and grouping
    ///
    /// Emptied entries disappear; a parallel block left with one stage
    /// collapses into a single entry.
    pub fn retain_stages<F>(&self, keep: F) -> Self
    where
        F: Fn(&Stage) -> bool,
    {
        let entries = self
            .entries
            .iter()
            .filter_map(|entry| {
                let kept: Vec<Stage> = entry.members().iter().filter(|s| keep(s)).cloned().collect();
                StageEntry::from_stages(kept)
            })
            .collect();
        self.with_entries(entries)
    }

    /// Copy of this document with the top-level entry order reversed
    pub fn reversed(&self) -> Self {
        self.with_entries(self.entries.iter().rev().cloned().collect())
    }
}
