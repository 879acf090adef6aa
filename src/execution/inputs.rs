//! Runtime input merging

use crate::error::PlanError;
use serde_yaml::{Mapping, Value};
use tracing::debug;

/// Placeholder marking a value supplied at run time
pub const RUNTIME_INPUT: &str = "<+input>";

const INPUT_SET_KEY: &str = "inputSet";
const WRAPPER_KEYS: [&str; 3] = ["stage", "step", "stepGroup"];

/// Fills runtime inputs of a pipeline document
pub trait RuntimeInputMerger: Send + Sync {
    /// Merge `input_set` into `pipeline_yaml`, returning the merged YAML
    fn merge(&self, pipeline_yaml: &str, input_set: Option<&str>) -> Result<String, PlanError>;
}

/// Replaces `<+input>` placeholders with the value at the same path of an
/// input set document
///
/// List items are matched by identifier, looking through `stage`, `step` and
/// `stepGroup` wrappers; items without an identifier are matched by position.
/// An input set may be wrapped in a top-level `inputSet` mapping.
#[derive(Debug, Clone, Default)]
pub struct InputSetMerger;

impl InputSetMerger {
    pub fn new() -> Self {
        Self
    }
}

impl RuntimeInputMerger for InputSetMerger {
    fn merge(&self, pipeline_yaml: &str, input_set: Option<&str>) -> Result<String, PlanError> {
        let Some(input_set) = input_set.filter(|s| !s.trim().is_empty()) else {
            return Ok(pipeline_yaml.to_string());
        };

        let mut template: Value = serde_yaml::from_str(pipeline_yaml)
            .map_err(|e| PlanError::InputMerge(format!("pipeline is not valid YAML: {}", e)))?;
        let inputs: Value = serde_yaml::from_str(input_set)
            .map_err(|e| PlanError::InputMerge(format!("input set is not valid YAML: {}", e)))?;
        let inputs = inputs.get(INPUT_SET_KEY).cloned().unwrap_or(inputs);

        let filled = fill(&mut template, &inputs);
        debug!("Filled {} runtime input(s)", filled);

        serde_yaml::to_string(&template).map_err(|e| PlanError::InputMerge(e.to_string()))
    }
}

fn is_runtime_input(value: &Value) -> bool {
    value.as_str().is_some_and(|s| s.trim().starts_with(RUNTIME_INPUT))
}

/// Fill placeholders of `template` from `inputs`; returns how many were filled
fn fill(template: &mut Value, inputs: &Value) -> usize {
    if is_runtime_input(template) {
        if inputs.is_null() || is_runtime_input(inputs) {
            return 0;
        }
        *template = inputs.clone();
        return 1;
    }

    match template {
        Value::Mapping(mapping) => match inputs.as_mapping() {
            Some(input_mapping) => fill_mapping(mapping, input_mapping),
            None => 0,
        },
        Value::Sequence(items) => match inputs.as_sequence() {
            Some(input_items) => items
                .iter_mut()
                .enumerate()
                .map(|(index, item)| match matching_item(item, index, input_items) {
                    Some(input) => fill(item, input),
                    None => 0,
                })
                .sum(),
            None => 0,
        },
        _ => 0,
    }
}

fn fill_mapping(mapping: &mut Mapping, inputs: &Mapping) -> usize {
    mapping
        .iter_mut()
        .map(|(key, value)| match inputs.get(key) {
            Some(input) => fill(value, input),
            None => 0,
        })
        .sum()
}

fn item_identifier(item: &Value) -> Option<&str> {
    if let Some(id) = item.get("identifier").and_then(Value::as_str) {
        return Some(id);
    }
    WRAPPER_KEYS
        .iter()
        .find_map(|key| item.get(*key).and_then(|inner| inner.get("identifier")).and_then(Value::as_str))
}

fn matching_item<'a>(item: &Value, index: usize, inputs: &'a [Value]) -> Option<&'a Value> {
    match item_identifier(item) {
        Some(id) => inputs.iter().find(|input| item_identifier(input) == Some(id)),
        None => inputs.get(index),
    }
}
