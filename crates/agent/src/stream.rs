//! Streaming controller
//!
//! Re-expresses the pipeline as incremental emission: a producer task runs
//! the stages and writes chunks into a bounded channel while the consumer
//! drains it. Dropping the consumer closes the channel; the producer
//! observes the failed send and stops, so abandoned streams never keep
//! working in the background.
//!
//! A query already present in the session cache skips the workflow and
//! replays the cached text through the same sentence chunker.

use crate::chunker::SentenceChunker;
use crate::generate::GENERATION_APOLOGY;
use crate::grader::{GradeInput, Route};
use crate::message::ConversationState;
use crate::pipeline::RetrievalPipeline;
use crate::prompts;
use answerforge_common::cache::keys;
use answerforge_common::{audit, metrics};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

/// Status placeholder emitted before agent reasoning
pub const ANALYZING_STATUS: &str = "**Analyzing the question**...\n\n";
/// Status placeholder emitted before retrieval
pub const RETRIEVING_STATUS: &str = "**Retrieving supporting context**...\n\n";
/// Status placeholder emitted before generation
pub const COMPOSING_STATUS: &str = "**Composing the answer**...\n\n";

/// Pause after each flush so a consumer can interleave rendering
const FLUSH_YIELD: Duration = Duration::from_millis(10);

/// Spawn the producer task and hand back the consumer end
pub(crate) fn spawn(
    pipeline: Arc<RetrievalPipeline>,
    query: String,
    thread_id: String,
) -> ReceiverStream<String> {
    let capacity = pipeline.settings.stream_channel_capacity;
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(run(pipeline, query, thread_id, tx));
    ReceiverStream::new(rx)
}

struct ChunkEmitter {
    tx: mpsc::Sender<String>,
    chunker: SentenceChunker,
    sent: usize,
}

impl ChunkEmitter {
    /// Send one chunk; false means the consumer is gone
    async fn send(&mut self, chunk: String) -> bool {
        if self.tx.send(chunk).await.is_err() {
            return false;
        }
        self.sent += 1;
        true
    }

    /// Send text sentence-by-sentence, yielding after each flush
    async fn send_chunked(&mut self, text: &str) -> bool {
        for chunk in self.chunker.chunks(text) {
            if !self.send(chunk).await {
                return false;
            }
            tokio::time::sleep(FLUSH_YIELD).await;
        }
        true
    }
}

async fn run(
    pipeline: Arc<RetrievalPipeline>,
    query: String,
    thread_id: String,
    tx: mpsc::Sender<String>,
) {
    let query = query.trim().to_string();
    let strategy = pipeline.settings.strategy;
    let mut emitter = ChunkEmitter {
        tx,
        chunker: SentenceChunker::new(pipeline.settings.stream_flush_chars),
        sent: 0,
    };

    // Whole-query cache hit: replay instead of doing new work
    match pipeline
        .session_cache
        .get::<String>(&keys::answer(&query), &thread_id)
        .await
    {
        Ok(Some(cached)) => {
            metrics::record_cache(true, "session");
            emitter.send_chunked(&cached).await;
            metrics::record_stream_chunks(emitter.sent);
            return;
        }
        Ok(None) => metrics::record_cache(false, "session"),
        Err(e) => warn!(error = %e, "Session cache lookup failed"),
    }

    if !emitter.send(ANALYZING_STATUS.to_string()).await {
        return;
    }

    let keywords = pipeline.extractor.extract(&query).await;
    let mut state = ConversationState::new();
    state.push_human_with_keywords(&query, keywords.clone());

    // The model decides whether retrieval is worth a tool call
    let decision = match pipeline
        .llm
        .invoke_with_tools(
            &prompts::tool_decision_messages(&query, &keywords),
            &pipeline.tools.specs(),
        )
        .await
    {
        Ok(turn) => turn,
        Err(e) => {
            audit::log_execution("agent_error", json!({ "query": query }), json!(e.to_string()));
            let apology = format!("{} Technical reason: {}", GENERATION_APOLOGY, e);
            emitter.send(apology).await;
            return;
        }
    };
    if !decision.content.is_empty() {
        state.push_ai(&decision.content);
    }

    let docs = match &decision.tool_call {
        Some(call) => {
            if !emitter.send(RETRIEVING_STATUS.to_string()).await {
                return;
            }

            let provider = pipeline.tools.by_name(&call.name);
            let tool_query = query_argument(&call.arguments).unwrap_or_else(|| query.clone());
            let docs = match provider.search(&tool_query).await {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(error = %e, tool = provider.name(), "Retrieval failed");
                    audit::log_execution(
                        "retrieve_error",
                        json!({ "query": tool_query, "tool": provider.name() }),
                        json!(e.to_string()),
                    );
                    String::new()
                }
            };
            state.push_tool(&docs, provider.name());

            if strategy.supports_reduce() {
                let report = pipeline
                    .grader
                    .grade(GradeInput {
                        question: query.clone(),
                        question_keywords: Some(keywords),
                        docs,
                        last_tool: Some(provider.name().to_string()),
                    })
                    .await;

                if report.route == Route::Reduce {
                    // The reduced report becomes the context the final
                    // answer is generated from
                    let reduced = pipeline.generator.reduce(&query, &report.docs, &thread_id).await;
                    reduced.text
                } else {
                    report.docs
                }
            } else {
                docs
            }
        }
        // No tool chosen: the model's direct reply is the only context
        None => decision.content.clone(),
    };

    if !emitter.send(COMPOSING_STATUS.to_string()).await {
        return;
    }

    let output = pipeline.generator.generate(&query, &docs, &thread_id).await;
    state.push_ai(&output.text);

    if !emitter.send_chunked(&output.text).await {
        return;
    }

    // Persist the first AI-authored message under the original query
    if let Some(first) = state.first_ai() {
        if !first.is_empty() {
            if let Err(e) = pipeline
                .session_cache
                .set(&keys::answer(&query), &first.to_string(), &thread_id)
                .await
            {
                warn!(error = %e, "Session cache write failed");
            }
        }
    }

    metrics::record_stream_chunks(emitter.sent);
}

/// Pull the `query` argument out of a tool call's JSON arguments
fn query_argument(arguments: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(arguments)
        .ok()?
        .get("query")?
        .as_str()
        .map(|query| query.to_string())
}
