//! Retrieval strategy selection
//!
//! A closed set of strategies, each binding a fixed tool set at
//! construction time. An unsupported strategy name is a configuration
//! error and fails fast; nothing downstream re-checks the name.

use answerforge_common::errors::AppError;
use answerforge_common::llm::ToolSpec;
use answerforge_common::SearchProvider;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Canonical tool names
pub const LOCAL_TOOL: &str = "local_search";
pub const GLOBAL_TOOL: &str = "global_retriever";
pub const HYBRID_TOOL: &str = "hybrid_search";
pub const NAIVE_TOOL: &str = "naive_search";

/// Retrieval strategy bound at pipeline construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    /// Graph-backed entity-level search
    Local,
    /// Graph-backed community-level search; results arrive partitioned
    Global,
    /// Combined search exposing a standard and a global tool variant
    Hybrid,
    /// Plain vector search, no graph features
    Naive,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Local => "local",
            RetrievalStrategy::Global => "global",
            RetrievalStrategy::Hybrid => "hybrid",
            RetrievalStrategy::Naive => "naive",
        }
    }

    /// Whether retrieval routes through the grader with a `Reduce` edge
    ///
    /// True for the strategies exposing the global tool variant; everything
    /// else routes straight to generation.
    pub fn supports_reduce(&self) -> bool {
        matches!(self, RetrievalStrategy::Global | RetrievalStrategy::Hybrid)
    }

    /// Whether keyword extraction goes through the language model
    ///
    /// The graph-backed strategies prompt the model for structured
    /// keywords; hybrid delegates to its tool; naive extracts nothing.
    pub fn uses_model_extraction(&self) -> bool {
        matches!(self, RetrievalStrategy::Local | RetrievalStrategy::Global)
    }

    pub fn is_naive(&self) -> bool {
        matches!(self, RetrievalStrategy::Naive)
    }
}

impl FromStr for RetrievalStrategy {
    type Err = AppError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "local" => Ok(RetrievalStrategy::Local),
            "global" => Ok(RetrievalStrategy::Global),
            "hybrid" => Ok(RetrievalStrategy::Hybrid),
            "naive" => Ok(RetrievalStrategy::Naive),
            other => Err(AppError::Configuration {
                message: format!("Unsupported retrieval strategy: {}", other),
            }),
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tools a strategy exposes
///
/// Every strategy binds one primary tool; hybrid additionally binds the
/// global variant. The set is validated against the strategy at pipeline
/// construction.
#[derive(Clone)]
pub struct ToolSet {
    primary: Arc<dyn SearchProvider>,
    global: Option<Arc<dyn SearchProvider>>,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("primary", &"<SearchProvider>")
            .field("global", &self.global.as_ref().map(|_| "<SearchProvider>"))
            .finish()
    }
}

impl ToolSet {
    /// Build and validate the tool set for a strategy
    pub fn new(
        strategy: RetrievalStrategy,
        primary: Arc<dyn SearchProvider>,
        global: Option<Arc<dyn SearchProvider>>,
    ) -> Result<Self, AppError> {
        if strategy == RetrievalStrategy::Hybrid && global.is_none() {
            return Err(AppError::Configuration {
                message: "Hybrid strategy requires the global tool variant".to_string(),
            });
        }
        if strategy != RetrievalStrategy::Hybrid && global.is_some() {
            return Err(AppError::Configuration {
                message: format!(
                    "Strategy {} does not expose a global tool variant",
                    strategy
                ),
            });
        }
        Ok(Self { primary, global })
    }

    pub fn primary(&self) -> &Arc<dyn SearchProvider> {
        &self.primary
    }

    pub fn global(&self) -> Option<&Arc<dyn SearchProvider>> {
        self.global.as_ref()
    }

    /// Resolve a tool by name, falling back to the primary tool
    pub fn by_name(&self, name: &str) -> &Arc<dyn SearchProvider> {
        if self.primary.name() == name {
            return &self.primary;
        }
        if let Some(global) = &self.global {
            if global.name() == name {
                return global;
            }
        }
        &self.primary
    }

    /// Tool specs surfaced to the model when it decides on retrieval
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs = vec![ToolSpec {
            name: self.primary.name().to_string(),
            description: self.primary.description().to_string(),
        }];
        if let Some(global) = &self.global {
            specs.push(ToolSpec {
                name: global.name().to_string(),
                description: global.description().to_string(),
            });
        }
        specs
    }

    /// Names of all bound tools
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.primary.name()];
        if let Some(global) = &self.global {
            names.push(global.name());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use answerforge_common::search::MockSearchProvider;

    fn provider(name: &str) -> Arc<dyn SearchProvider> {
        Arc::new(MockSearchProvider::new(name, "docs"))
    }

    #[test]
    fn test_strategy_parsing_exhaustive() {
        for name in ["local", "global", "hybrid", "naive"] {
            assert!(RetrievalStrategy::from_str(name).is_ok());
        }
        for name in ["graph", "vector", "LOCAL", ""] {
            let err = RetrievalStrategy::from_str(name).unwrap_err();
            assert!(err.to_string().contains("Unsupported retrieval strategy"));
        }
    }

    #[test]
    fn test_tool_sets_per_strategy() {
        let local = ToolSet::new(RetrievalStrategy::Local, provider(LOCAL_TOOL), None).unwrap();
        assert_eq!(local.names(), vec![LOCAL_TOOL]);

        let global = ToolSet::new(RetrievalStrategy::Global, provider(GLOBAL_TOOL), None).unwrap();
        assert_eq!(global.names(), vec![GLOBAL_TOOL]);

        let hybrid = ToolSet::new(
            RetrievalStrategy::Hybrid,
            provider(HYBRID_TOOL),
            Some(provider(GLOBAL_TOOL)),
        )
        .unwrap();
        assert_eq!(hybrid.names(), vec![HYBRID_TOOL, GLOBAL_TOOL]);
        assert_eq!(hybrid.specs().len(), 2);

        let naive = ToolSet::new(RetrievalStrategy::Naive, provider(NAIVE_TOOL), None).unwrap();
        assert_eq!(naive.names(), vec![NAIVE_TOOL]);
    }

    #[test]
    fn test_hybrid_requires_global_variant() {
        let err = ToolSet::new(RetrievalStrategy::Hybrid, provider(HYBRID_TOOL), None).unwrap_err();
        assert!(err.to_string().contains("global tool variant"));

        let err = ToolSet::new(
            RetrievalStrategy::Naive,
            provider(NAIVE_TOOL),
            Some(provider(GLOBAL_TOOL)),
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not expose"));
    }

    #[test]
    fn test_by_name_falls_back_to_primary() {
        let tools = ToolSet::new(
            RetrievalStrategy::Hybrid,
            provider(HYBRID_TOOL),
            Some(provider(GLOBAL_TOOL)),
        )
        .unwrap();
        assert_eq!(tools.by_name(GLOBAL_TOOL).name(), GLOBAL_TOOL);
        assert_eq!(tools.by_name("unknown_tool").name(), HYBRID_TOOL);
    }

    #[test]
    fn test_reduce_and_extraction_capabilities() {
        assert!(RetrievalStrategy::Global.supports_reduce());
        assert!(RetrievalStrategy::Hybrid.supports_reduce());
        assert!(!RetrievalStrategy::Local.supports_reduce());
        assert!(!RetrievalStrategy::Naive.supports_reduce());

        assert!(RetrievalStrategy::Local.uses_model_extraction());
        assert!(RetrievalStrategy::Global.uses_model_extraction());
        assert!(!RetrievalStrategy::Hybrid.uses_model_extraction());
        assert!(!RetrievalStrategy::Naive.uses_model_extraction());
    }
}
