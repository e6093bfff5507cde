//! Hallucination evaluation
//!
//! Runs a span-level hallucination detector over (context, question,
//! answer), reconciles span offsets against the answer text, and
//! synthesizes a report with inline highlight markup. Detector failures
//! are contained: the outcome degrades to an apologetic message with no
//! report fields attached.
//!
//! Highlight reconciliation applies spans in descending start order so
//! that a replacement never shifts the offsets of spans not yet
//! processed. Offsets are character offsets, so multi-byte answers
//! reconcile correctly.

use crate::message::ConversationState;
use answerforge_common::{audit, metrics, HallucinationDetector, HallucinationSpan};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Fixed apology prefix for contained evaluation failures
pub const EVALUATION_APOLOGY: &str = "Sorry, the evaluation could not be completed.";

/// Notice returned by any streaming-mode invocation
pub const STREAMING_NOT_SUPPORTED: &str = "The evaluator does not support streaming output.";

/// Structured evaluation input
///
/// Replaces positional transcript access with named fields; the positional
/// adapter lives in `from_state`.
#[derive(Debug, Clone, Default)]
pub struct EvaluationInput {
    pub context: String,
    pub question: String,
    pub answer: String,
}

impl EvaluationInput {
    pub fn new(
        context: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            context: context.into(),
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// Positional adapter: context, question, and answer are the third,
    /// second, and last transcript entries; missing entries default to
    /// empty strings rather than failing.
    pub fn from_state(state: &ConversationState) -> Self {
        let content_at = |n| {
            state
                .from_back(n)
                .map(|entry| entry.content.clone())
                .unwrap_or_default()
        };
        Self {
            context: content_at(3),
            question: content_at(2),
            answer: content_at(1),
        }
    }
}

/// A successful evaluation
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub report: String,
    pub highlighted_answer: String,
    pub has_hallucinations: bool,
    pub hallucination_count: usize,
}

/// Evaluation outcome: a report, or a contained failure
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    Report(EvaluationReport),
    Failed { message: String },
}

pub struct HallucinationEvaluator {
    detector: Arc<dyn HallucinationDetector>,
}

impl HallucinationEvaluator {
    pub fn new(detector: Arc<dyn HallucinationDetector>) -> Self {
        Self { detector }
    }

    /// Evaluate an answer against its grounding context
    pub async fn evaluate(&self, input: &EvaluationInput) -> EvaluationOutcome {
        let context = vec![input.context.clone()];

        let spans = match self
            .detector
            .predict(&context, &input.question, &input.answer)
            .await
        {
            Ok(spans) => spans,
            Err(e) => {
                metrics::record_detection(0, false);
                let message = format!("{} Error: {}", EVALUATION_APOLOGY, e);
                audit::log_execution(
                    "evaluate_error",
                    json!({
                        "question": input.question,
                        "answer": input.answer,
                        "context": input.context,
                    }),
                    json!(&message),
                );
                return EvaluationOutcome::Failed { message };
            }
        };

        let (highlighted_answer, applied) = highlight_spans(&input.answer, spans);
        metrics::record_detection(applied.len(), true);

        let report = build_report(&applied, &highlighted_answer);

        audit::log_execution(
            "evaluate",
            json!({
                "question": input.question,
                "answer": input.answer,
                "context": input.context,
            }),
            json!(&report),
        );

        EvaluationOutcome::Report(EvaluationReport {
            report,
            highlighted_answer,
            has_hallucinations: !applied.is_empty(),
            hallucination_count: applied.len(),
        })
    }

    /// Streaming-mode invocation always yields a single fixed notice
    pub fn evaluate_stream(&self) -> &'static str {
        STREAMING_NOT_SUPPORTED
    }
}

/// Wrap each span's text in highlight markup inside the answer
///
/// Spans are applied in descending start order; earlier replacements
/// therefore never shift the offsets of spans still to be processed.
/// Spans that fall out of bounds or overlap an already-applied span are
/// dropped with a warning. Returns the highlighted answer and the applied
/// spans in application (descending start) order.
fn highlight_spans(
    answer: &str,
    mut spans: Vec<HallucinationSpan>,
) -> (String, Vec<HallucinationSpan>) {
    if spans.is_empty() {
        return (answer.to_string(), spans);
    }

    spans.sort_by(|a, b| b.start.cmp(&a.start));

    // Character offset -> byte offset, valid against the original answer.
    // Descending application keeps lower byte ranges untouched.
    let char_count = answer.chars().count();
    let mut byte_at: Vec<usize> = answer.char_indices().map(|(i, _)| i).collect();
    byte_at.push(answer.len());

    let mut highlighted = answer.to_string();
    let mut applied: Vec<HallucinationSpan> = Vec::new();
    let mut lowest_applied_start = char_count + 1;

    for span in spans {
        if span.start >= span.end || span.end > char_count {
            warn!(start = span.start, end = span.end, "Dropping out-of-bounds span");
            continue;
        }
        if span.end > lowest_applied_start {
            warn!(
                start = span.start,
                end = span.end,
                "Dropping span overlapping an already-applied span"
            );
            continue;
        }

        let (byte_start, byte_end) = (byte_at[span.start], byte_at[span.end]);
        let original = &answer[byte_start..byte_end];
        let markup = format!(
            "<span class='hallucination' id='hallucination-{}' data-confidence='{:.4}'>{}</span>",
            applied.len() + 1,
            span.confidence,
            original
        );
        highlighted.replace_range(byte_start..byte_end, &markup);

        lowest_applied_start = span.start;
        applied.push(span);
    }

    (highlighted, applied)
}

/// Synthesize the report text
///
/// `spans` arrive in descending start order and are itemized in that
/// order; confidences are formatted to four decimal places.
fn build_report(spans: &[HallucinationSpan], highlighted_answer: &str) -> String {
    let mut report = String::from("**Hallucination Report**:\n\n");

    if spans.is_empty() {
        report.push_str("No hallucinations detected. This indicates:\n");
        report.push_str("1. The answer stays consistent with the context\n");
        report.push_str("2. No unsupported or unverifiable statements were found\n");
    } else {
        report.push_str("Detected the following hallucinated spans:\n");
        for span in spans {
            report.push_str(&format!(
                "- text: '{}', confidence: {:.4}\n",
                span.text, span.confidence
            ));
        }
    }

    report.push_str("\n**Summary**:\n");
    if spans.is_empty() {
        report.push_str("The answer appears consistent with the context; no obvious hallucinations.\n");
    } else {
        report.push_str(
            "The answer contains hallucinations and needs review. The affected spans are \
             highlighted below.\n",
        );
        report.push_str("\n**Highlighted answer**:\n\n");
        report.push_str(highlighted_answer);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use answerforge_common::detector::MockDetector;

    fn span(start: usize, end: usize, confidence: f64, text: &str) -> HallucinationSpan {
        HallucinationSpan {
            start,
            end,
            confidence,
            text: text.to_string(),
        }
    }

    /// Re-extract the plain text between highlight markers
    fn strip_markup(highlighted: &str) -> Vec<String> {
        let mut extracted = Vec::new();
        let mut rest = highlighted;
        while let Some(open) = rest.find('>') {
            if let Some(close_idx) = rest.find("</span>") {
                if open < close_idx {
                    extracted.push(rest[open + 1..close_idx].to_string());
                    rest = &rest[close_idx + "</span>".len()..];
                    continue;
                }
            }
            break;
        }
        extracted
    }

    #[tokio::test]
    async fn test_offset_safe_highlighting() {
        let answer = "A is B. B is C.";
        let spans = vec![
            span(0, 6, 0.9, "A is B"),
            span(8, 14, 0.8, "B is C"),
        ];
        let detector = Arc::new(MockDetector::with_spans(spans));
        let evaluator = HallucinationEvaluator::new(detector);

        let outcome = evaluator
            .evaluate(&EvaluationInput::new("ctx", "q", answer))
            .await;
        let EvaluationOutcome::Report(report) = outcome else {
            panic!("expected a report");
        };

        assert!(report.has_hallucinations);
        assert_eq!(report.hallucination_count, 2);

        // The higher-start span was substituted first: its markup carries
        // id 1, and both spans' plain text survives between markers
        assert!(report
            .highlighted_answer
            .contains("id='hallucination-1' data-confidence='0.8000'>B is C</span>"));
        assert!(report
            .highlighted_answer
            .contains("id='hallucination-2' data-confidence='0.9000'>A is B</span>"));
        assert_eq!(strip_markup(&report.highlighted_answer), vec!["A is B", "B is C"]);

        // Length accounting: original minus removed spans plus markup
        let markup_len = |confidence: &str, id: usize, text: &str| {
            format!(
                "<span class='hallucination' id='hallucination-{}' data-confidence='{}'>{}</span>",
                id, confidence, text
            )
            .chars()
            .count()
        };
        let expected = answer.chars().count() - 6 - 6
            + markup_len("0.8000", 1, "B is C")
            + markup_len("0.9000", 2, "A is B");
        assert_eq!(report.highlighted_answer.chars().count(), expected);

        // The report itemizes descending by start with 4-decimal confidences
        let b_pos = report.report.find("'B is C', confidence: 0.8000").unwrap();
        let a_pos = report.report.find("'A is B', confidence: 0.9000").unwrap();
        assert!(b_pos < a_pos);
        // The highlighted answer is appended to the report as well
        assert!(report.report.contains("**Highlighted answer**"));
    }

    #[tokio::test]
    async fn test_empty_hallucination_path() {
        let evaluator = HallucinationEvaluator::new(Arc::new(MockDetector::empty()));
        let outcome = evaluator
            .evaluate(&EvaluationInput::new("ctx", "q", "The answer."))
            .await;

        let EvaluationOutcome::Report(report) = outcome else {
            panic!("expected a report");
        };
        assert!(!report.has_hallucinations);
        assert_eq!(report.hallucination_count, 0);
        assert_eq!(report.highlighted_answer, "The answer.");
        assert!(report.report.contains("No hallucinations detected"));
        assert!(!report.report.contains("**Highlighted answer**"));
    }

    #[tokio::test]
    async fn test_multibyte_answer_offsets_are_character_based() {
        let answer = "牛顿提出了相对论。";
        let spans = vec![span(5, 8, 0.95, "相对论")];
        let evaluator = HallucinationEvaluator::new(Arc::new(MockDetector::with_spans(spans)));

        let outcome = evaluator
            .evaluate(&EvaluationInput::new("ctx", "q", answer))
            .await;
        let EvaluationOutcome::Report(report) = outcome else {
            panic!("expected a report");
        };
        assert!(report.highlighted_answer.contains(">相对论</span>"));
        assert!(report.highlighted_answer.starts_with("牛顿提出了<span"));
    }

    #[tokio::test]
    async fn test_overlapping_span_is_dropped() {
        let answer = "A is B. B is C.";
        let spans = vec![
            span(0, 6, 0.9, "A is B"),
            span(4, 10, 0.7, "B. B i"),
        ];
        let evaluator = HallucinationEvaluator::new(Arc::new(MockDetector::with_spans(spans)));

        let outcome = evaluator
            .evaluate(&EvaluationInput::new("ctx", "q", answer))
            .await;
        let EvaluationOutcome::Report(report) = outcome else {
            panic!("expected a report");
        };
        // The higher-start span applies; the overlapping one is dropped
        assert_eq!(report.hallucination_count, 1);
        assert_eq!(strip_markup(&report.highlighted_answer), vec!["B. B i"]);
    }

    #[tokio::test]
    async fn test_out_of_bounds_span_is_dropped() {
        let evaluator = HallucinationEvaluator::new(Arc::new(MockDetector::with_spans(vec![
            span(0, 999, 0.9, "way too long"),
        ])));
        let outcome = evaluator
            .evaluate(&EvaluationInput::new("ctx", "q", "short"))
            .await;
        let EvaluationOutcome::Report(report) = outcome else {
            panic!("expected a report");
        };
        assert!(!report.has_hallucinations);
        assert_eq!(report.highlighted_answer, "short");
    }

    #[tokio::test]
    async fn test_detector_failure_is_contained() {
        let evaluator =
            HallucinationEvaluator::new(Arc::new(MockDetector::failing("model not loaded")));
        let outcome = evaluator
            .evaluate(&EvaluationInput::new("ctx", "q", "answer"))
            .await;

        let EvaluationOutcome::Failed { message } = outcome else {
            panic!("expected a contained failure");
        };
        assert!(message.contains(EVALUATION_APOLOGY));
        assert!(message.contains("model not loaded"));
    }

    #[test]
    fn test_positional_adapter_defaults() {
        let mut state = ConversationState::new();
        state.push_ai("only answer");

        let input = EvaluationInput::from_state(&state);
        assert_eq!(input.context, "");
        assert_eq!(input.question, "");
        assert_eq!(input.answer, "only answer");
    }

    #[test]
    fn test_positional_adapter_full_state() {
        let mut state = ConversationState::new();
        state.push_human("the context");
        state.push_human("the question");
        state.push_ai("the answer");

        let input = EvaluationInput::from_state(&state);
        assert_eq!(input.context, "the context");
        assert_eq!(input.question, "the question");
        assert_eq!(input.answer, "the answer");
    }

    #[test]
    fn test_streaming_not_supported() {
        let evaluator = HallucinationEvaluator::new(Arc::new(MockDetector::empty()));
        assert_eq!(evaluator.evaluate_stream(), STREAMING_NOT_SUPPORTED);
    }
}
