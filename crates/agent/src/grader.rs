//! Relevance grading and sufficiency repair
//!
//! Decides whether retrieval output flows to generation or reduction, and
//! repairs insufficient retrievals with one local-search fallback. Grading
//! never fails outward: every degraded path resolves to `Generate`.
//!
//! The keyword match rate is computed and recorded as a diagnostic only;
//! it does not influence the routing decision.

use answerforge_common::{audit, metrics, KeywordSet, SearchProvider};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Routing decision out of the grader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Generate,
    Reduce,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Generate => "generate",
            Route::Reduce => "reduce",
        }
    }
}

/// Structured grading input
///
/// Built by the pipeline from the conversation; grading itself never
/// indexes into the transcript.
#[derive(Debug, Clone)]
pub struct GradeInput {
    pub question: String,
    pub question_keywords: Option<KeywordSet>,
    pub docs: String,
    /// Name of the tool whose invocation produced `docs`
    pub last_tool: Option<String>,
}

/// Grading outcome
///
/// `docs` carries the (possibly repaired) document text forward; the input
/// state is never mutated in place.
#[derive(Debug, Clone)]
pub struct GradeReport {
    pub route: Route,
    pub docs: String,
    pub repaired: bool,
    pub match_rate: f64,
    pub matched: usize,
    pub keyword_count: usize,
}

pub struct Grader {
    local_fallback: Arc<dyn SearchProvider>,
    min_sufficient_chars: usize,
    global_tool_name: String,
}

impl Grader {
    pub fn new(
        local_fallback: Arc<dyn SearchProvider>,
        min_sufficient_chars: usize,
        global_tool_name: impl Into<String>,
    ) -> Self {
        Self {
            local_fallback,
            min_sufficient_chars,
            global_tool_name: global_tool_name.into(),
        }
    }

    /// Grade retrieval output and repair it if insufficient
    pub async fn grade(&self, input: GradeInput) -> GradeReport {
        // Global retrieval output is partitioned report data; it always
        // reduces, regardless of content.
        if input.last_tool.as_deref() == Some(self.global_tool_name.as_str()) {
            audit::log_execution(
                "grade_documents",
                json!({ "question": input.question, "last_tool": input.last_tool }),
                json!("reduce"),
            );
            metrics::record_grade(Route::Reduce.as_str(), 0.0);
            return GradeReport {
                route: Route::Reduce,
                docs: input.docs,
                repaired: false,
                match_rate: 0.0,
                matched: 0,
                keyword_count: 0,
            };
        }

        let (docs, repaired) = self.repair_if_insufficient(&input).await;

        let keywords = self.grading_keywords(&input);
        let docs_lower = docs.to_lowercase();
        let matched = keywords
            .iter()
            .filter(|keyword| docs_lower.contains(&keyword.to_lowercase()))
            .count();
        let match_rate = if keywords.is_empty() {
            0.0
        } else {
            matched as f64 / keywords.len() as f64
        };

        audit::log_execution(
            "grade_documents",
            json!({
                "question": input.question,
                "keywords": keywords,
                "match_rate": match_rate,
                "docs_length": docs.chars().count(),
                "repaired": repaired,
            }),
            json!(format!("match rate: {}", match_rate)),
        );
        metrics::record_grade(Route::Generate.as_str(), match_rate);

        GradeReport {
            route: Route::Generate,
            docs,
            repaired,
            match_rate,
            matched,
            keyword_count: keywords.len(),
        }
    }

    /// One local-search fallback for retrievals below the sufficiency bar
    ///
    /// Returns the repaired docs, or the original ones when the fallback
    /// fails or is itself insufficient.
    async fn repair_if_insufficient(&self, input: &GradeInput) -> (String, bool) {
        let doc_chars = input.docs.chars().count();
        if doc_chars >= self.min_sufficient_chars {
            return (input.docs.clone(), false);
        }

        info!(
            docs_length = doc_chars,
            threshold = self.min_sufficient_chars,
            "Retrieved documents insufficient, attempting local search fallback"
        );

        match self.local_fallback.search(&input.question).await {
            Ok(fallback) if fallback.chars().count() > self.min_sufficient_chars => {
                metrics::record_repair(true);
                (fallback, true)
            }
            Ok(_) => {
                metrics::record_repair(false);
                (input.docs.clone(), false)
            }
            Err(e) => {
                warn!(error = %e, "Local search fallback failed");
                metrics::record_repair(false);
                (input.docs.clone(), false)
            }
        }
    }

    /// Keywords used for the match-rate diagnostic
    ///
    /// Attached keyword metadata wins; otherwise the lowercased question is
    /// tokenized and words longer than two characters are used.
    fn grading_keywords(&self, input: &GradeInput) -> Vec<String> {
        if let Some(keywords) = &input.question_keywords {
            let all = keywords.all();
            if !all.is_empty() {
                return all;
            }
        }

        input
            .question
            .to_lowercase()
            .split_whitespace()
            .filter(|word| word.chars().count() > 2)
            .map(|word| word.to_string())
            .collect()
    }
}
