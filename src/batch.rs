// src/batch.rs
//! Batch orchestrator: sequential multi-operation execution under a single
//! transaction scope, with `{{ref.prop}}` interpolation between steps.
//! (spec component L)

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::router;
use crate::session::Session;

#[derive(Debug, Clone, Deserialize)]
pub struct BatchStep {
    pub id: Option<String>,
    pub tool: String,
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub instruction: Option<String>,
    pub steps: Vec<BatchStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub id: Option<String>,
    pub tool: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub steps: Vec<StepOutcome>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Run a batch: one outer transaction scope, interpolated params per step,
/// whole-scope rollback on the first failure.
pub fn run_batch(session: &mut Session, request: BatchRequest) -> Result<BatchResult> {
    let description = request
        .instruction
        .clone()
        .unwrap_or_else(|| "batch".to_string());
    session.tx.start_transaction(description, request.instruction.clone(), now());

    let mut outcomes: Vec<StepOutcome> = Vec::new();
    let mut by_id: std::collections::HashMap<String, StepOutcome> = std::collections::HashMap::new();

    for (index, step) in request.steps.iter().enumerate() {
        let interpolated = match interpolate(&step.params, index, &outcomes, &by_id) {
            Ok(v) => v,
            Err(e) => return Err(session.tx.abort_scope(e)),
        };

        let dispatch_result = router::dispatch_tool(session, &step.tool, interpolated);

        match dispatch_result {
            Ok(text) => {
                let outcome = StepOutcome {
                    index,
                    id: step.id.clone(),
                    tool: step.tool.clone(),
                    text,
                };
                if let Some(id) = &step.id {
                    by_id.insert(id.clone(), outcome.clone());
                }
                outcomes.push(outcome);
            }
            Err(e) => {
                let wrapped = Error::BatchStepFailed {
                    index,
                    tool: step.tool.clone(),
                    source: Box::new(e),
                };
                return Err(session.tx.abort_scope(wrapped));
            }
        }
    }

    session.tx.commit(now())?;
    session.save_journal();
    Ok(BatchResult { steps: outcomes })
}

/// Walk `params`, substituting `{{ref.prop}}` occurrences where `ref` is
/// either `stepN` (1-based in the written form, 0-based internally) or a
/// previously seen step `id`.
fn interpolate(
    params: &Value,
    current_index: usize,
    outcomes: &[StepOutcome],
    by_id: &std::collections::HashMap<String, StepOutcome>,
) -> Result<Value> {
    let pattern = Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\.([A-Za-z0-9_]+)\s*\}\}").unwrap();

    match params {
        Value::String(s) => {
            let mut result = s.clone();
            for captures in pattern.captures_iter(s) {
                let whole = captures.get(0).unwrap().as_str();
                let reference = &captures[1];
                let prop = &captures[2];
                let resolved = resolve_ref(reference, prop, current_index, outcomes, by_id)?;
                result = result.replace(whole, &resolved);
            }
            Ok(Value::String(result))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interpolate(item, current_index, outcomes, by_id)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), interpolate(value, current_index, outcomes, by_id)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_ref(
    reference: &str,
    prop: &str,
    current_index: usize,
    outcomes: &[StepOutcome],
    by_id: &std::collections::HashMap<String, StepOutcome>,
) -> Result<String> {
    let outcome = if let Some(n) = reference.strip_prefix("step") {
        let step_index: usize = n.parse().map_err(|_| Error::UnknownInterpolationRef {
            step: current_index,
            reference: reference.to_string(),
        })?;
        outcomes.get(step_index.saturating_sub(1)).or_else(|| outcomes.get(step_index))
    } else {
        by_id.get(reference)
    };

    let outcome = outcome.ok_or_else(|| Error::UnknownInterpolationRef {
        step: current_index,
        reference: reference.to_string(),
    })?;

    match prop {
        "text" => Ok(outcome.text.clone()),
        "path" => extract_json_field(&outcome.text, "path")
            .ok_or_else(|| Error::UnknownInterpolationRef {
                step: current_index,
                reference: format!("{reference}.{prop}"),
            }),
        "token" => extract_token(&outcome.text, false),
        "tokens" => extract_token(&outcome.text, true),
        _ => Err(Error::UnknownInterpolationRef {
            step: current_index,
            reference: format!("{reference}.{prop}"),
        }),
    }
}

fn extract_json_field(text: &str, field: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get(field)?.as_str().map(|s| s.to_string())
}

fn extract_token(text: &str, all: bool) -> Result<String> {
    let pattern = Regex::new(r"LAT:[A-Za-z0-9_\-]+:[A-Za-z0-9_\-]+").unwrap();
    let matches: Vec<&str> = pattern.find_iter(text).map(|m| m.as_str()).collect();
    if matches.is_empty() {
        return Err(Error::UnknownInterpolationRef {
            step: 0,
            reference: "token".to_string(),
        });
    }
    if all {
        Ok(matches.join(","))
    } else {
        Ok(matches[0].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_id_reference_text_field() {
        let outcomes = vec![StepOutcome {
            index: 0,
            id: Some("cre".to_string()),
            tool: "nts_file_manage".to_string(),
            text: r#"{"path":"T.java"}"#.to_string(),
        }];
        let mut by_id = std::collections::HashMap::new();
        by_id.insert("cre".to_string(), outcomes[0].clone());

        let params = serde_json::json!({ "path": "{{cre.path}}" });
        let result = interpolate(&params, 1, &outcomes, &by_id).unwrap();
        assert_eq!(result["path"], "T.java");
    }

    #[test]
    fn unknown_reference_fails() {
        let params = serde_json::json!({ "path": "{{missing.path}}" });
        let result = interpolate(&params, 0, &[], &std::collections::HashMap::new());
        assert!(matches!(result, Err(Error::UnknownInterpolationRef { .. })));
    }

    #[test]
    fn extracts_token_from_text_via_regex() {
        let text = "wrote file, token LAT:abc123:def456 issued";
        let token = extract_token(text, false).unwrap();
        assert_eq!(token, "LAT:abc123:def456");
    }
}
