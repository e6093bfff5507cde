//! Evaluation handler

use axum::{extract::State, Json};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use answerforge_agent::{EvaluationInput, EvaluationOutcome};
use answerforge_common::errors::{AppError, Result};

/// Evaluate request: the (context, question, answer) triple
///
/// Context and question may be omitted; the evaluator tolerates empty
/// grounding and still reports on the answer.
#[derive(Debug, Deserialize, Validate)]
pub struct EvaluateRequest {
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub question: String,

    #[validate(length(min = 1))]
    pub answer: String,
}

/// Evaluate an answer for hallucinated content
pub async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluationOutcome>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let input = EvaluationInput::new(request.context, request.question, request.answer);
    let outcome = state.evaluator.evaluate(&input).await;

    if let EvaluationOutcome::Report(report) = &outcome {
        tracing::info!(
            has_hallucinations = report.has_hallucinations,
            hallucination_count = report.hallucination_count,
            "Evaluation completed"
        );
    }

    Ok(Json(outcome))
}
