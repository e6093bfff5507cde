//! Execution audit logging
//!
//! Every pipeline stage reports its (input, output) pair here. The sink is
//! fire-and-forget: it must never fail and never slow the pipeline down.
//! Events land on the `audit` tracing target so deployments can route them
//! to a separate layer or drop them with an env filter.

use serde_json::Value;

/// Record a stage execution
///
/// `kind` names the stage event (`extract_keywords`, `grade_documents`,
/// `generate`, `generate_error`, `reduce`, `evaluate`, ...). Inputs and
/// outputs are truncated so oversized documents never bloat the log stream.
pub fn log_execution(kind: &str, input: Value, output: Value) {
    tracing::debug!(
        target: "audit",
        kind,
        input = %truncate(&input),
        output = %truncate(&output),
        "stage executed"
    );
}

const MAX_FIELD_CHARS: usize = 2000;

fn truncate(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() <= MAX_FIELD_CHARS {
        return rendered;
    }
    let head: String = rendered.chars().take(MAX_FIELD_CHARS).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_execution_never_panics() {
        log_execution("generate", json!({"question": "q"}), json!("answer"));
        log_execution("evaluate", Value::Null, Value::Null);
    }

    #[test]
    fn test_truncation() {
        let long = "x".repeat(5000);
        let rendered = truncate(&json!(long));
        assert!(rendered.chars().count() <= MAX_FIELD_CHARS + 3);
        assert!(rendered.ends_with("..."));
    }
}
