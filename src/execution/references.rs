//! Static reference validation

use crate::core::PipelineDocument;
use crate::error::PlanError;
use regex::Regex;
use serde_yaml::Value;
use std::sync::OnceLock;

/// Checks that a document holds no reference the runtime could not resolve
pub trait StaticReferenceValidator: Send + Sync {
    fn validate(&self, document: &PipelineDocument) -> Result<(), PlanError>;
}

fn runtime_input_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<\+input>").expect("runtime input pattern is valid"))
}

fn stage_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<\+(?:pipeline\.)?stages\.([a-zA-Z_][0-9a-zA-Z_]*)")
            .expect("stage reference pattern is valid")
    })
}

/// Reports runtime inputs left unfilled and expressions naming stages the
/// document does not declare
#[derive(Debug, Clone, Default)]
pub struct ExpressionReferenceValidator;

impl ExpressionReferenceValidator {
    pub fn new() -> Self {
        Self
    }

    fn scan(&self, document: &PipelineDocument, path: &str, value: &Value, problems: &mut Vec<String>) {
        match value {
            Value::String(text) => {
                if runtime_input_pattern().is_match(text) {
                    problems.push(format!("{}: runtime input was not provided", path));
                }
                for captures in stage_reference_pattern().captures_iter(text) {
                    let stage = &captures[1];
                    if !document.contains_stage(stage) {
                        problems.push(format!("{}: expression references unknown stage '{}'", path, stage));
                    }
                }
            }
            Value::Mapping(mapping) => {
                for (key, child) in mapping {
                    let key = key.as_str().map(str::to_string).unwrap_or_else(|| format!("{:?}", key));
                    self.scan(document, &format!("{}.{}", path, key), child, problems);
                }
            }
            Value::Sequence(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.scan(document, &format!("{}[{}]", path, index), item, problems);
                }
            }
            Value::Tagged(tagged) => self.scan(document, path, &tagged.value, problems),
            _ => {}
        }
    }
}

impl StaticReferenceValidator for ExpressionReferenceValidator {
    fn validate(&self, document: &PipelineDocument) -> Result<(), PlanError> {
        let mut problems = Vec::new();
        if let Some(pipeline) = document.to_value().get("pipeline") {
            self.scan(document, "pipeline", pipeline, &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PlanError::UnresolvedReferences(problems))
        }
    }
}
