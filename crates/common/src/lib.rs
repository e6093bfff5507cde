//! AnswerForge Common Library
//!
//! Shared code for the AnswerForge services including:
//! - Capability traits (language model, search, hallucination detector)
//! - Two-tier cache plumbing (Redis + in-memory)
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability
//! - Execution audit logging

pub mod audit;
pub mod cache;
pub mod config;
pub mod detector;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod search;

// Re-export commonly used types
pub use cache::{CacheStore, GlobalCache, SessionCache};
pub use config::AppConfig;
pub use detector::{HallucinationDetector, HallucinationSpan};
pub use errors::{AppError, Result};
pub use llm::LanguageModel;
pub use search::{KeywordSet, SearchProvider};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Thread id used when a request carries no session scope
pub const DEFAULT_THREAD_ID: &str = "default";
