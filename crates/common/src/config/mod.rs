//! Configuration management for AnswerForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Redis configuration
    pub redis: RedisConfig,

    /// Language model configuration
    pub llm: LlmConfig,

    /// Search service configuration
    pub search: SearchConfig,

    /// Hallucination detector configuration
    pub detector: DetectorConfig,

    /// Agent pipeline configuration
    pub agent: AgentConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL
    pub url: String,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Skip Redis and keep all cache entries in process memory
    #[serde(default)]
    pub memory_only: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat completions endpoint (OpenAI-compatible)
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key for the model service
    pub api_key: Option<String>,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Base URL of the search service
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// API key for the search service
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorConfig {
    /// Base URL of the span-detector service
    #[serde(default = "default_detector_base_url")]
    pub base_url: String,

    /// Detector model identifier
    #[serde(default = "default_detector_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_detector_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Retrieval strategy: local, global, hybrid, naive
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Requested answer shape passed to the model prompt
    #[serde(default = "default_response_type")]
    pub response_type: String,

    /// Retrieved documents shorter than this trigger sufficiency repair
    #[serde(default = "default_min_sufficient_chars")]
    pub min_sufficient_chars: usize,

    /// Generated answers this short or shorter are returned but not cached
    #[serde(default = "default_min_cacheable_chars")]
    pub min_cacheable_chars: usize,

    /// Streaming buffer flush threshold in characters
    #[serde(default = "default_stream_flush_chars")]
    pub stream_flush_chars: usize,

    /// Streaming channel capacity (chunks in flight)
    #[serde(default = "default_stream_channel_capacity")]
    pub stream_channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_redis_ttl() -> u64 { 0 }
fn default_key_prefix() -> String { "answerforge".to_string() }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_llm_model() -> String { crate::DEFAULT_CHAT_MODEL.to_string() }
fn default_llm_temperature() -> f32 { 0.7 }
fn default_llm_max_tokens() -> usize { 2000 }
fn default_llm_timeout() -> u64 { 60 }
fn default_llm_retries() -> u32 { 3 }
fn default_search_base_url() -> String { "http://localhost:8091".to_string() }
fn default_search_timeout() -> u64 { 30 }
fn default_detector_base_url() -> String { "http://localhost:8092".to_string() }
fn default_detector_model() -> String { "lettucedect-base-modernbert-en-v1".to_string() }
fn default_detector_timeout() -> u64 { 30 }
fn default_strategy() -> String { "hybrid".to_string() }
fn default_response_type() -> String { "multiple paragraphs".to_string() }
fn default_min_sufficient_chars() -> usize { 100 }
fn default_min_cacheable_chars() -> usize { 10 }
fn default_stream_flush_chars() -> usize { 40 }
fn default_stream_channel_capacity() -> usize { 32 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "answerforge".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("redis.url", "redis://localhost:6379")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__AGENT__STRATEGY=naive
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
                default_ttl_secs: default_redis_ttl(),
                key_prefix: default_key_prefix(),
                memory_only: false,
            },
            llm: LlmConfig {
                endpoint: default_llm_endpoint(),
                api_key: None,
                model: default_llm_model(),
                temperature: default_llm_temperature(),
                max_tokens: default_llm_max_tokens(),
                timeout_secs: default_llm_timeout(),
                max_retries: default_llm_retries(),
            },
            search: SearchConfig {
                base_url: default_search_base_url(),
                api_key: None,
                timeout_secs: default_search_timeout(),
            },
            detector: DetectorConfig {
                base_url: default_detector_base_url(),
                model: default_detector_model(),
                timeout_secs: default_detector_timeout(),
            },
            agent: AgentConfig {
                strategy: default_strategy(),
                response_type: default_response_type(),
                min_sufficient_chars: default_min_sufficient_chars(),
                min_cacheable_chars: default_min_cacheable_chars(),
                stream_flush_chars: default_stream_flush_chars(),
                stream_channel_capacity: default_stream_channel_capacity(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
            rate_limit: RateLimitConfig {
                requests_per_second: default_rate_limit(),
                burst: default_burst(),
                enabled: default_enabled(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.agent.strategy, "hybrid");
        assert_eq!(config.agent.min_sufficient_chars, 100);
        assert_eq!(config.agent.stream_flush_chars, 40);
    }

    #[test]
    fn test_default_thresholds_match_pipeline_contracts() {
        let config = AppConfig::default();
        // Answers at or below this length are never cached
        assert_eq!(config.agent.min_cacheable_chars, 10);
        // TTL of zero means entries live until the backend evicts them
        assert_eq!(config.redis.default_ttl_secs, 0);
    }
}
