//! AnswerForge Agent
//!
//! The answer pipeline core: retrieval-strategy dispatch, query keyword
//! extraction, relevance grading with sufficiency repair, cache-first
//! generation and reduction, sentence-level streaming, and span-level
//! hallucination evaluation.
//!
//! Construction is the only fallible surface: an unsupported strategy or
//! an inconsistent tool set fails fast. After that, every stage contains
//! its own failures and the pipeline always produces a textual answer.

pub mod chunker;
pub mod evaluator;
pub mod generate;
pub mod grader;
pub mod keywords;
pub mod message;
pub mod pipeline;
pub mod prompts;
pub mod strategy;
pub mod stream;

pub use chunker::SentenceChunker;
pub use evaluator::{
    EvaluationInput, EvaluationOutcome, EvaluationReport, HallucinationEvaluator,
};
pub use generate::{Generator, StageOutput, GENERATION_APOLOGY};
pub use grader::{GradeInput, GradeReport, Grader, Route};
pub use keywords::KeywordExtractor;
pub use message::{ConversationState, MessageEntry, Role};
pub use pipeline::{AskOutcome, PipelineSettings, RetrievalPipeline};
pub use strategy::{RetrievalStrategy, ToolSet};
