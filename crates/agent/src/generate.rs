//! Generation and reduction stages
//!
//! Both stages are cache-first: the global cache is consulted before the
//! session cache, a session hit is promoted into the global cache, and
//! concurrent misses for the same key serialize through a single-flight
//! guard. Model failures never escape; they surface as an apologetic
//! answer carrying the raw error text.

use crate::prompts;
use crate::strategy::RetrievalStrategy;
use answerforge_common::cache::{keys, GlobalCache, SessionCache, SingleFlight};
use answerforge_common::llm::ChatMessage;
use answerforge_common::{audit, metrics, LanguageModel};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Fixed apology prefix for contained stage failures
pub const GENERATION_APOLOGY: &str = "Sorry, I could not answer this question.";

/// Which tier satisfied a stage, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Global,
    Session,
}

/// Output of a generation or reduction stage
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub text: String,
    pub cache_hit: Option<CacheTier>,
}

impl StageOutput {
    fn fresh(text: String) -> Self {
        Self {
            text,
            cache_hit: None,
        }
    }

    pub fn from_cache(&self) -> bool {
        self.cache_hit.is_some()
    }
}

pub struct Generator {
    llm: Arc<dyn LanguageModel>,
    session_cache: SessionCache,
    global_cache: GlobalCache,
    flights: SingleFlight,
    strategy: RetrievalStrategy,
    response_type: String,
    min_cacheable_chars: usize,
}

impl Generator {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        session_cache: SessionCache,
        global_cache: GlobalCache,
        strategy: RetrievalStrategy,
        response_type: impl Into<String>,
        min_cacheable_chars: usize,
    ) -> Self {
        Self {
            llm,
            session_cache,
            global_cache,
            flights: SingleFlight::new(),
            strategy,
            response_type: response_type.into(),
            min_cacheable_chars,
        }
    }

    /// Look up a previously generated answer without generating
    ///
    /// Checks the global cache first, then the session cache; a session hit
    /// is promoted into the global cache before returning.
    pub async fn lookup(&self, question: &str, thread_id: &str) -> Option<StageOutput> {
        self.lookup_key(&keys::answer(question), thread_id).await
    }

    async fn lookup_key(&self, cache_key: &str, thread_id: &str) -> Option<StageOutput> {
        match self.global_cache.get::<String>(cache_key).await {
            Ok(Some(answer)) => {
                metrics::record_cache(true, "global");
                return Some(StageOutput {
                    text: answer,
                    cache_hit: Some(CacheTier::Global),
                });
            }
            Ok(None) => metrics::record_cache(false, "global"),
            Err(e) => warn!(error = %e, "Global cache lookup failed"),
        }

        match self.session_cache.get::<String>(cache_key, thread_id).await {
            Ok(Some(answer)) => {
                metrics::record_cache(true, "session");
                // Session hits are always promoted into the global tier
                if let Err(e) = self.global_cache.set(cache_key, &answer).await {
                    warn!(error = %e, "Global cache promotion failed");
                }
                Some(StageOutput {
                    text: answer,
                    cache_hit: Some(CacheTier::Session),
                })
            }
            Ok(None) => {
                metrics::record_cache(false, "session");
                None
            }
            Err(e) => {
                warn!(error = %e, "Session cache lookup failed");
                None
            }
        }
    }

    /// Generate an answer for (question, docs)
    pub async fn generate(&self, question: &str, docs: &str, thread_id: &str) -> StageOutput {
        let cache_key = keys::answer(question);

        if let Some(hit) = self.lookup_key(&cache_key, thread_id).await {
            audit::log_execution(
                "generate",
                json!({ "question": question, "docs_length": docs.chars().count() }),
                json!("cache hit"),
            );
            return hit;
        }

        // Serialize concurrent misses for the same question; waiters
        // re-check the cache once the leader has stored its answer.
        let _flight = self.flights.acquire(&cache_key).await;
        if let Some(hit) = self.lookup_key(&cache_key, thread_id).await {
            return hit;
        }

        let messages = prompts::rag_messages(
            docs,
            question,
            &self.response_type,
            self.strategy.is_naive(),
        );

        match self.invoke_model(&messages).await {
            Ok(response) => {
                // Short responses are likely low quality; return them but
                // keep them out of both cache tiers.
                if response.chars().count() > self.min_cacheable_chars {
                    self.store(&cache_key, &response, thread_id).await;
                }

                audit::log_execution(
                    "generate",
                    json!({ "question": question, "docs_length": docs.chars().count() }),
                    json!(&response),
                );

                StageOutput::fresh(response)
            }
            Err(e) => {
                let error_msg = format!("{} Technical reason: {}", GENERATION_APOLOGY, e);
                audit::log_execution(
                    "generate_error",
                    json!({ "question": question, "docs_length": docs.chars().count() }),
                    json!(&error_msg),
                );
                StageOutput::fresh(error_msg)
            }
        }
    }

    /// Reduce a partitioned analysis report into one answer
    ///
    /// Keyed under the `reduce:` namespace and cached unconditionally.
    pub async fn reduce(&self, question: &str, report: &str, thread_id: &str) -> StageOutput {
        let cache_key = keys::reduce(question);

        if let Some(hit) = self.lookup_key(&cache_key, thread_id).await {
            audit::log_execution(
                "reduce",
                json!({ "question": question, "report_length": report.chars().count() }),
                json!("cache hit"),
            );
            return hit;
        }

        let _flight = self.flights.acquire(&cache_key).await;
        if let Some(hit) = self.lookup_key(&cache_key, thread_id).await {
            return hit;
        }

        let messages = prompts::reduce_messages(report, question, &self.response_type);

        match self.invoke_model(&messages).await {
            Ok(response) => {
                self.store(&cache_key, &response, thread_id).await;

                audit::log_execution(
                    "reduce",
                    json!({ "question": question, "report_length": report.chars().count() }),
                    json!(&response),
                );

                StageOutput::fresh(response)
            }
            Err(e) => {
                let error_msg = format!("{} Technical reason: {}", GENERATION_APOLOGY, e);
                audit::log_execution(
                    "reduce_error",
                    json!({ "question": question, "report_length": report.chars().count() }),
                    json!(&error_msg),
                );
                StageOutput::fresh(error_msg)
            }
        }
    }

    async fn invoke_model(&self, messages: &[ChatMessage]) -> answerforge_common::Result<String> {
        let start = Instant::now();
        let result = self.llm.invoke(messages).await;
        metrics::record_model(
            start.elapsed().as_secs_f64(),
            self.llm.model_name(),
            result.is_ok(),
        );
        result
    }

    async fn store(&self, cache_key: &str, response: &str, thread_id: &str) {
        if let Err(e) = self.session_cache.set(cache_key, &response, thread_id).await {
            warn!(error = %e, "Session cache write failed");
        }
        if let Err(e) = self.global_cache.set(cache_key, &response).await {
            warn!(error = %e, "Global cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use answerforge_common::cache::{CacheStore, MemoryCache};
    use answerforge_common::llm::MockChatModel;

    fn generator_with(llm: Arc<MockChatModel>) -> Generator {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        Generator::new(
            llm,
            SessionCache::new(store.clone()),
            GlobalCache::new(store),
            RetrievalStrategy::Hybrid,
            "multiple paragraphs",
            10,
        )
    }

    #[tokio::test]
    async fn test_cache_idempotence() {
        let llm = Arc::new(MockChatModel::new(
            "A generated answer long enough to cache.",
        ));
        let generator = generator_with(llm.clone());

        let first = generator.generate("q", "docs", "t1").await;
        assert!(!first.from_cache());

        let second = generator.generate("q", "docs", "t1").await;
        assert_eq!(second.text, first.text);
        assert!(second.from_cache());
        // No second model invocation happened
        assert_eq!(llm.invocations(), 1);
    }

    #[tokio::test]
    async fn test_session_hit_promotes_to_global() {
        let llm = Arc::new(MockChatModel::new("unused"));
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        let session = SessionCache::new(store.clone());
        let global = GlobalCache::new(store);
        let generator = Generator::new(
            llm,
            session.clone(),
            global.clone(),
            RetrievalStrategy::Hybrid,
            "multiple paragraphs",
            10,
        );

        // Seed only the session tier
        session
            .set(&keys::answer("q"), &"session answer".to_string(), "t1")
            .await
            .unwrap();

        let hit = generator.generate("q", "docs", "t1").await;
        assert_eq!(hit.cache_hit, Some(CacheTier::Session));

        // An immediately following global lookup hits, from any thread
        let promoted: Option<String> = global.get(&keys::answer("q")).await.unwrap();
        assert_eq!(promoted.as_deref(), Some("session answer"));

        let other_thread = generator.generate("q", "docs", "t2").await;
        assert_eq!(other_thread.cache_hit, Some(CacheTier::Global));
    }

    #[tokio::test]
    async fn test_short_responses_are_not_cached() {
        let llm = Arc::new(MockChatModel::new("too short"));
        let generator = generator_with(llm.clone());

        let first = generator.generate("q", "docs", "t1").await;
        assert_eq!(first.text, "too short");

        let second = generator.generate("q", "docs", "t1").await;
        assert!(!second.from_cache());
        assert_eq!(llm.invocations(), 2);
    }

    #[tokio::test]
    async fn test_reduce_caches_unconditionally() {
        let llm = Arc::new(MockChatModel::new("short"));
        let generator = generator_with(llm.clone());

        let first = generator.reduce("q", "report", "t1").await;
        assert_eq!(first.text, "short");

        let second = generator.reduce("q", "report", "t1").await;
        assert!(second.from_cache());
        assert_eq!(llm.invocations(), 1);
    }

    #[tokio::test]
    async fn test_reduce_namespace_is_separate() {
        let llm = Arc::new(MockChatModel::new(
            "A generated answer long enough to cache.",
        ));
        let generator = generator_with(llm.clone());

        generator.generate("q", "docs", "t1").await;
        // Same question under the reduce namespace still misses
        let reduced = generator.reduce("q", "report", "t1").await;
        assert!(!reduced.from_cache());
        assert_eq!(llm.invocations(), 2);
    }

    #[tokio::test]
    async fn test_error_containment() {
        let llm = Arc::new(MockChatModel::failing("connection refused"));
        let generator = generator_with(llm);

        let output = generator.generate("q", "docs", "t1").await;
        assert!(output.text.contains(GENERATION_APOLOGY));
        assert!(output.text.contains("connection refused"));

        let reduced = generator.reduce("q", "report", "t1").await;
        assert!(reduced.text.contains(GENERATION_APOLOGY));
    }

    #[tokio::test]
    async fn test_failed_generations_are_not_cached() {
        let llm = Arc::new(MockChatModel::failing("boom"));
        let generator = generator_with(llm.clone());

        generator.generate("q", "docs", "t1").await;
        generator.generate("q", "docs", "t1").await;
        // Apologies are never cached, so the model was attempted twice
        assert_eq!(llm.invocations(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_single_flight() {
        let llm = Arc::new(MockChatModel::new(
            "A generated answer long enough to cache.",
        ));
        let generator = Arc::new(generator_with(llm.clone()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let generator = generator.clone();
            handles.push(tokio::spawn(async move {
                generator.generate("q", "docs", "t1").await.text
            }));
        }
        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                "A generated answer long enough to cache."
            );
        }

        assert_eq!(llm.invocations(), 1);
    }
}
