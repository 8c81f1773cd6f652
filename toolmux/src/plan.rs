//! Plan parsing.
//!
//! A plan is a JSON array of `{action, parameters}` objects, or a single such
//! object. Steps are validated one at a time as they execute, so a malformed
//! step only fails once every step before it has run.

use serde_json::{Map, Value};

use crate::error::DispatchError;
use crate::handler::Params;

const FUNCTION_PREFIX: &str = "functions.";

/// One unvalidated plan step.
pub type PlanStep = Map<String, Value>;

/// A validated plan step.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanAction {
    pub action: String,
    pub parameters: Params,
}

impl PlanAction {
    pub fn from_step(step: &PlanStep) -> Result<Self, DispatchError> {
        let action = match step.get("action") {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => {
                return Err(DispatchError::InvalidAction(
                    "'action' must be a non-empty string".to_string(),
                ))
            }
        };
        let action = action.strip_prefix(FUNCTION_PREFIX).unwrap_or(action);
        if action.is_empty() {
            return Err(DispatchError::InvalidAction(
                "'action' must name a tool".to_string(),
            ));
        }

        let parameters = match step.get("parameters") {
            None | Some(Value::Null) => Params::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(DispatchError::InvalidAction(format!(
                    "'parameters' for {} must be an object, got {}",
                    action,
                    json_type(other)
                )))
            }
        };

        Ok(Self {
            action: action.to_string(),
            parameters,
        })
    }
}

/// Trim the text and drop a single surrounding markdown code fence.
pub fn normalize(text: &str) -> &str {
    let text = text.trim();
    let Some(body) = text.strip_prefix("```").and_then(|rest| rest.strip_suffix("```")) else {
        return text;
    };
    // optional language tag; a plan never starts with a letter
    body.trim_start_matches(|c: char| c.is_ascii_alphabetic()).trim()
}

/// Parse plan text into its steps.
pub fn parse(text: &str) -> Result<Vec<PlanStep>, DispatchError> {
    let text = normalize(text);
    if text.is_empty() {
        return Err(DispatchError::EmptyPlan("ExecutePlan received empty plan".to_string()));
    }
    let value: Value = serde_json::from_str(text).map_err(|e| DispatchError::Parse(e.to_string()))?;
    steps(value)
}

/// Interpret an already-decoded JSON value as plan steps.
pub fn steps(value: Value) -> Result<Vec<PlanStep>, DispatchError> {
    let steps = match value {
        Value::Object(step) => vec![step],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(step) => Ok(step),
                _ => Err(DispatchError::Parse("plan array contains non-object element".to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(DispatchError::Parse(
                "plan JSON is neither an object nor an array".to_string(),
            ))
        }
    };
    if steps.is_empty() {
        return Err(DispatchError::EmptyPlan("received empty plan".to_string()));
    }
    Ok(steps)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
