//! The retrieval pipeline
//!
//! Wires the stages together in their fixed order: extract keywords →
//! cache check → retrieve → grade/repair → generate or reduce → cache.
//! Strategy and tool set are bound at construction; an unsupported
//! configuration fails fast there, and nothing after construction raises.

use crate::generate::Generator;
use crate::grader::{GradeInput, Grader, Route};
use crate::keywords::KeywordExtractor;
use crate::message::ConversationState;
use crate::strategy::{RetrievalStrategy, ToolSet};
use crate::stream;
use answerforge_common::cache::{GlobalCache, SessionCache};
use answerforge_common::config::AgentConfig;
use answerforge_common::{audit, metrics, LanguageModel, SearchProvider};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

/// Pipeline settings derived from configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub strategy: RetrievalStrategy,
    pub response_type: String,
    pub min_sufficient_chars: usize,
    pub min_cacheable_chars: usize,
    pub stream_flush_chars: usize,
    pub stream_channel_capacity: usize,
}

impl PipelineSettings {
    /// Parse settings, failing fast on an unsupported strategy name
    pub fn from_config(config: &AgentConfig) -> answerforge_common::Result<Self> {
        Ok(Self {
            strategy: RetrievalStrategy::from_str(&config.strategy)?,
            response_type: config.response_type.clone(),
            min_sufficient_chars: config.min_sufficient_chars,
            min_cacheable_chars: config.min_cacheable_chars,
            stream_flush_chars: config.stream_flush_chars,
            stream_channel_capacity: config.stream_channel_capacity.max(1),
        })
    }
}

/// Result of a non-streaming ask
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub answer: String,
    pub route: Route,
    pub strategy: RetrievalStrategy,
    pub cached: bool,
    /// Match-rate diagnostic, present when grading ran
    pub match_rate: Option<f64>,
    pub processing_time_ms: u64,
}

pub struct RetrievalPipeline {
    pub(crate) settings: PipelineSettings,
    pub(crate) tools: ToolSet,
    pub(crate) llm: Arc<dyn LanguageModel>,
    pub(crate) extractor: KeywordExtractor,
    pub(crate) grader: Grader,
    pub(crate) generator: Generator,
    pub(crate) session_cache: SessionCache,
}

impl RetrievalPipeline {
    /// Construct the pipeline
    ///
    /// `local_fallback` backs sufficiency repair; the tool set must have
    /// been built for the same strategy.
    pub fn new(
        settings: PipelineSettings,
        tools: ToolSet,
        local_fallback: Arc<dyn SearchProvider>,
        llm: Arc<dyn LanguageModel>,
        session_cache: SessionCache,
        global_cache: GlobalCache,
    ) -> Self {
        let extractor = KeywordExtractor::new(
            settings.strategy,
            llm.clone(),
            tools.primary().clone(),
            session_cache.clone(),
        );
        let grader = Grader::new(
            local_fallback,
            settings.min_sufficient_chars,
            crate::strategy::GLOBAL_TOOL,
        );
        let generator = Generator::new(
            llm.clone(),
            session_cache.clone(),
            global_cache,
            settings.strategy,
            settings.response_type.clone(),
            settings.min_cacheable_chars,
        );

        Self {
            settings,
            tools,
            llm,
            extractor,
            grader,
            generator,
            session_cache,
        }
    }

    pub fn strategy(&self) -> RetrievalStrategy {
        self.settings.strategy
    }

    /// Answer a question through the full pipeline
    ///
    /// Never errors: every internal failure degrades or is contained into
    /// the returned answer text.
    pub async fn ask(&self, query: &str, thread_id: Option<&str>) -> AskOutcome {
        let start = Instant::now();
        let thread_id = thread_id.unwrap_or(answerforge_common::DEFAULT_THREAD_ID);
        let query = query.trim();
        let strategy = self.settings.strategy;

        // A previously generated answer short-circuits retrieval entirely
        if let Some(hit) = self.generator.lookup(query, thread_id).await {
            metrics::record_question(strategy.as_str(), true);
            return AskOutcome {
                answer: hit.text,
                route: Route::Generate,
                strategy,
                cached: true,
                match_rate: None,
                processing_time_ms: start.elapsed().as_millis() as u64,
            };
        }

        let keywords = self.extractor.extract(query).await;

        let mut state = ConversationState::new();
        state.push_human_with_keywords(query, keywords.clone());

        let retrieve_start = Instant::now();
        let provider = self.tools.primary();
        let docs = match provider.search(query).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, tool = provider.name(), "Retrieval failed");
                audit::log_execution(
                    "retrieve_error",
                    json!({ "query": query, "tool": provider.name() }),
                    json!(e.to_string()),
                );
                String::new()
            }
        };
        state.push_tool(&docs, provider.name());
        metrics::record_stage(
            "retrieve",
            strategy.as_str(),
            retrieve_start.elapsed().as_secs_f64(),
        );

        // Routing is structural: only reduce-capable strategies grade
        let (route, docs, match_rate) = if strategy.supports_reduce() {
            let report = self
                .grader
                .grade(GradeInput {
                    question: query.to_string(),
                    question_keywords: Some(keywords),
                    docs,
                    last_tool: Some(provider.name().to_string()),
                })
                .await;
            (report.route, report.docs, Some(report.match_rate))
        } else {
            (Route::Generate, docs, None)
        };

        let stage_start = Instant::now();
        let output = match route {
            Route::Generate => self.generator.generate(query, &docs, thread_id).await,
            Route::Reduce => self.generator.reduce(query, &docs, thread_id).await,
        };
        metrics::record_stage(
            route.as_str(),
            strategy.as_str(),
            stage_start.elapsed().as_secs_f64(),
        );

        state.push_ai(&output.text);
        let cached = output.from_cache();
        metrics::record_question(strategy.as_str(), cached);

        AskOutcome {
            answer: output.text,
            route,
            strategy,
            cached,
            match_rate,
            processing_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Answer a question as an incremental chunk stream
    ///
    /// A producer task runs the pipeline and writes chunks into a bounded
    /// channel; dropping the returned stream stops the producer at its
    /// next send.
    pub fn ask_stream(
        self: Arc<Self>,
        query: impl Into<String>,
        thread_id: Option<String>,
    ) -> ReceiverStream<String> {
        stream::spawn(
            self,
            query.into(),
            thread_id.unwrap_or_else(|| answerforge_common::DEFAULT_THREAD_ID.to_string()),
        )
    }
}
