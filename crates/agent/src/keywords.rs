//! Query keyword extraction
//!
//! Cache-first extraction of low-level and high-level keywords from the
//! user query. The extraction route depends on the retrieval strategy:
//! hybrid delegates to the search tool's own extractor, the graph-backed
//! strategies prompt the model for structured JSON, and naive extracts
//! nothing. Extraction never fails outward: every error degrades to the
//! empty set, and the result (empty included) is written back to the cache.

use crate::prompts;
use crate::strategy::RetrievalStrategy;
use answerforge_common::cache::{keys, SessionCache};
use answerforge_common::{audit, metrics, KeywordSet, LanguageModel, SearchProvider};
use regex_lite::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

pub struct KeywordExtractor {
    strategy: RetrievalStrategy,
    llm: Arc<dyn LanguageModel>,
    tool: Arc<dyn SearchProvider>,
    cache: SessionCache,
}

impl KeywordExtractor {
    pub fn new(
        strategy: RetrievalStrategy,
        llm: Arc<dyn LanguageModel>,
        tool: Arc<dyn SearchProvider>,
        cache: SessionCache,
    ) -> Self {
        Self {
            strategy,
            llm,
            tool,
            cache,
        }
    }

    /// Extract keywords for a query
    pub async fn extract(&self, query: &str) -> KeywordSet {
        let cache_key = keys::keywords(query);

        match self
            .cache
            .get::<KeywordSet>(&cache_key, answerforge_common::DEFAULT_THREAD_ID)
            .await
        {
            Ok(Some(cached)) => {
                metrics::record_cache(true, "keywords");
                return cached;
            }
            Ok(None) => metrics::record_cache(false, "keywords"),
            Err(e) => warn!(error = %e, "Keyword cache lookup failed"),
        }

        let keywords = match self.extract_inner(query).await {
            Ok(keywords) => keywords,
            Err(e) => {
                warn!(error = %e, "Keyword extraction failed");
                KeywordSet::default()
            }
        };

        // Written back even when extraction degraded to the empty set
        if let Err(e) = self
            .cache
            .set(&cache_key, &keywords, answerforge_common::DEFAULT_THREAD_ID)
            .await
        {
            warn!(error = %e, "Keyword cache write failed");
        }

        audit::log_execution(
            "extract_keywords",
            json!(query),
            serde_json::to_value(&keywords).unwrap_or(Value::Null),
        );

        keywords
    }

    async fn extract_inner(&self, query: &str) -> answerforge_common::Result<KeywordSet> {
        match self.strategy {
            RetrievalStrategy::Hybrid => self.tool.extract_keywords(query).await,
            RetrievalStrategy::Local | RetrievalStrategy::Global => {
                let content = self.llm.invoke(&prompts::keyword_messages(query)).await?;
                Ok(parse_keyword_json(&content))
            }
            RetrievalStrategy::Naive => Ok(KeywordSet::default()),
        }
    }
}

/// Recover a keyword set from free-form model output
///
/// Takes the first greedy `{...}` match, parses it as JSON, and fills
/// missing keys with empty sequences. Anything unparseable or non-object
/// yields the empty set.
fn parse_keyword_json(content: &str) -> KeywordSet {
    let brace = Regex::new(r"\{[\s\S]*\}").expect("static regex");

    let Some(matched) = brace.find(content) else {
        return KeywordSet::default();
    };

    match serde_json::from_str::<Value>(matched.as_str()) {
        Ok(Value::Object(_)) => {
            serde_json::from_str::<KeywordSet>(matched.as_str()).unwrap_or_default()
        }
        _ => KeywordSet::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use answerforge_common::cache::{CacheStore, MemoryCache};
    use answerforge_common::llm::{MockChatModel, ModelTurn};
    use answerforge_common::search::MockSearchProvider;

    fn session() -> SessionCache {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
        SessionCache::new(store)
    }

    #[test]
    fn test_parse_keyword_json_happy_path() {
        let content = "Here you go:\n{\"low_level\": [\"newton\"], \"high_level\": [\"physics\"]}";
        let keywords = parse_keyword_json(content);
        assert_eq!(keywords.low_level, vec!["newton"]);
        assert_eq!(keywords.high_level, vec!["physics"]);
    }

    #[test]
    fn test_parse_keyword_json_missing_keys_filled() {
        let keywords = parse_keyword_json("{\"low_level\": [\"a\"]}");
        assert_eq!(keywords.low_level, vec!["a"]);
        assert!(keywords.high_level.is_empty());
    }

    #[test]
    fn test_parse_keyword_json_degrades_to_empty() {
        assert!(parse_keyword_json("no json here").is_empty());
        assert!(parse_keyword_json("{not valid json}").is_empty());
        assert!(parse_keyword_json("[1, 2, 3]").is_empty());
    }

    #[tokio::test]
    async fn test_model_extraction_for_graph_strategy() {
        let llm = Arc::new(MockChatModel::new(
            "{\"low_level\": [\"relativity\"], \"high_level\": [\"physics\"]}",
        ));
        let tool: Arc<dyn SearchProvider> = Arc::new(MockSearchProvider::new("local_search", ""));
        let extractor = KeywordExtractor::new(RetrievalStrategy::Local, llm, tool, session());

        let keywords = extractor.extract("who proposed relativity?").await;
        assert_eq!(keywords.low_level, vec!["relativity"]);
    }

    #[tokio::test]
    async fn test_hybrid_delegates_to_tool() {
        let llm = Arc::new(MockChatModel::new("unused"));
        let expected = KeywordSet {
            low_level: vec!["attention".to_string()],
            high_level: vec!["transformers".to_string()],
        };
        let tool: Arc<dyn SearchProvider> = Arc::new(
            MockSearchProvider::new("hybrid_search", "").with_keywords(expected.clone()),
        );
        let extractor = KeywordExtractor::new(RetrievalStrategy::Hybrid, llm.clone(), tool, session());

        let keywords = extractor.extract("what is attention?").await;
        assert_eq!(keywords, expected);
        assert_eq!(llm.invocations(), 0);
    }

    #[tokio::test]
    async fn test_naive_always_empty() {
        let llm = Arc::new(MockChatModel::new("{\"low_level\": [\"x\"]}"));
        let tool: Arc<dyn SearchProvider> = Arc::new(MockSearchProvider::new("naive_search", ""));
        let extractor = KeywordExtractor::new(RetrievalStrategy::Naive, llm.clone(), tool, session());

        assert!(extractor.extract("anything").await.is_empty());
        assert_eq!(llm.invocations(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_skips_second_extraction() {
        let llm = Arc::new(
            MockChatModel::new("{\"low_level\": [\"x\"], \"high_level\": []}").with_turns(vec![
                ModelTurn {
                    content: "{\"low_level\": [\"first\"], \"high_level\": []}".to_string(),
                    tool_call: None,
                },
            ]),
        );
        let tool: Arc<dyn SearchProvider> = Arc::new(MockSearchProvider::new("local_search", ""));
        let extractor = KeywordExtractor::new(RetrievalStrategy::Local, llm.clone(), tool, session());

        let first = extractor.extract("q").await;
        let second = extractor.extract("q").await;
        assert_eq!(first, second);
        assert_eq!(llm.invocations(), 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_degrades_and_caches_empty() {
        let llm = Arc::new(MockChatModel::failing("model offline"));
        let tool: Arc<dyn SearchProvider> = Arc::new(MockSearchProvider::new("local_search", ""));
        let extractor = KeywordExtractor::new(RetrievalStrategy::Local, llm.clone(), tool, session());

        assert!(extractor.extract("q").await.is_empty());
        // The empty fallback was cached, so the model is not retried
        assert!(extractor.extract("q").await.is_empty());
        assert_eq!(llm.invocations(), 1);
    }
}
