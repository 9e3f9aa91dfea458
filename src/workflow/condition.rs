use serde_json::Value;

use crate::schemas::{StepResult, StepStatus};

use super::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionField {
    Status,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Eq,
    Ne,
}

/// Parsed condition expression.
///
/// The grammar is deliberately small: `<step_id>.<field> <op> <value>`
/// with `field ∈ {status, output}`, `op ∈ {==, !=}` and an identifier
/// value, or a bare `<step_id>` which is truthy iff that step completed.
/// Anything else fails workflow load.
#[derive(Debug, Clone)]
pub struct Condition {
    pub step_id: String,
    pub comparison: Option<(ConditionField, ConditionOp, String)>,
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn parse_condition(expression: &str) -> Result<Condition, WorkflowError> {
    let invalid = || {
        WorkflowError::ValidationError(format!(
            "invalid condition expression: {expression:?} (expected \"<step_id>\" or \"<step_id>.<field> <op> <value>\")"
        ))
    };

    let tokens: Vec<&str> = expression.split_whitespace().collect();
    match tokens.as_slice() {
        [subject] if is_identifier(subject) => Ok(Condition {
            step_id: subject.to_string(),
            comparison: None,
        }),
        [subject, op, value] => {
            let (step_id, field) = subject.split_once('.').ok_or_else(invalid)?;
            if !is_identifier(step_id) || !is_identifier(value) {
                return Err(invalid());
            }
            let field = match field {
                "status" => ConditionField::Status,
                "output" => ConditionField::Output,
                _ => return Err(invalid()),
            };
            let op = match *op {
                "==" => ConditionOp::Eq,
                "!=" => ConditionOp::Ne,
                _ => return Err(invalid()),
            };
            Ok(Condition {
                step_id: step_id.to_string(),
                comparison: Some((field, op, value.to_string())),
            })
        }
        _ => Err(invalid()),
    }
}

fn status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
    }
}

/// Evaluate a condition against the step results produced so far. A
/// reference to a step that has not run yet is simply false.
pub fn evaluate_condition(condition: &Condition, results: &[StepResult]) -> bool {
    let Some(result) = results.iter().find(|r| r.step_id == condition.step_id) else {
        return false;
    };

    match &condition.comparison {
        None => result.status == StepStatus::Completed,
        Some((field, op, value)) => {
            let actual = match field {
                ConditionField::Status => status_str(result.status).to_string(),
                ConditionField::Output => match &result.output {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            };
            match op {
                ConditionOp::Eq => actual == *value,
                ConditionOp::Ne => actual != *value,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed(step_id: &str, output: Value) -> StepResult {
        StepResult {
            step_id: step_id.into(),
            status: StepStatus::Completed,
            output,
            error: None,
            duration_ms: 1,
        }
    }

    #[test]
    fn parses_bare_step_reference() {
        let condition = parse_condition("fetch").unwrap();
        assert_eq!(condition.step_id, "fetch");
        assert!(condition.comparison.is_none());
    }

    #[test]
    fn parses_full_comparison() {
        let condition = parse_condition("fetch.status == completed").unwrap();
        assert_eq!(condition.step_id, "fetch");
        let (field, op, value) = condition.comparison.unwrap();
        assert_eq!(field, ConditionField::Status);
        assert_eq!(op, ConditionOp::Eq);
        assert_eq!(value, "completed");
    }

    #[test]
    fn rejects_anything_else() {
        for bad in [
            "",
            "a.b.c == d",
            "fetch.result == ok",
            "fetch.status >= completed",
            "fetch.status == 'quoted value'",
            "fetch.status ==",
            "fetch status == completed extra",
        ] {
            assert!(
                matches!(parse_condition(bad), Err(WorkflowError::ValidationError(_))),
                "accepted: {bad:?}"
            );
        }
    }

    #[test]
    fn bare_reference_is_truthy_on_completion() {
        let condition = parse_condition("fetch").unwrap();
        assert!(evaluate_condition(&condition, &[completed("fetch", Value::Null)]));
        assert!(!evaluate_condition(&condition, &[]));

        let failed = StepResult {
            step_id: "fetch".into(),
            status: StepStatus::Failed,
            output: Value::Null,
            error: Some("x".into()),
            duration_ms: 1,
        };
        assert!(!evaluate_condition(&condition, &[failed]));
    }

    #[test]
    fn status_and_output_comparisons() {
        let results = vec![completed("fetch", json!("ready"))];

        let eq = parse_condition("fetch.status == completed").unwrap();
        assert!(evaluate_condition(&eq, &results));

        let ne = parse_condition("fetch.status != failed").unwrap();
        assert!(evaluate_condition(&ne, &results));

        let output = parse_condition("fetch.output == ready").unwrap();
        assert!(evaluate_condition(&output, &results));

        let output_ne = parse_condition("fetch.output != ready").unwrap();
        assert!(!evaluate_condition(&output_ne, &results));
    }
}
