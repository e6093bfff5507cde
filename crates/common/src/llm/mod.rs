//! Language model abstraction
//!
//! Provides:
//! - A `LanguageModel` capability trait (plain invocation + tool-aware turns)
//! - An OpenAI-compatible chat client with bounded retry
//! - `MockChatModel` for tests (scripted replies, invocation counting)

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One chat turn sent to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Description of a tool the model may choose to invoke
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

/// A tool invocation chosen by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Raw JSON arguments as produced by the model
    pub arguments: String,
}

/// One model turn: either plain content, a tool call, or both
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub content: String,
    pub tool_call: Option<ToolCall>,
}

/// Capability trait for chat language models
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Invoke the model and return the response content
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Invoke the model with tools bound; the model may choose one
    async fn invoke_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat client
pub struct OpenAiChatModel {
    client: reqwest::Client,
    config: LlmConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition<'a>>>,
}

#[derive(Serialize)]
struct ToolDefinition<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionDefinition<'a>,
}

#[derive(Serialize)]
struct FunctionDefinition<'a> {
    name: &'a str,
    description: &'a str,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    function: ResponseFunctionCall,
}

#[derive(Deserialize)]
struct ResponseFunctionCall {
    name: String,
    arguments: String,
}

impl OpenAiChatModel {
    /// Create a new chat client
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    /// Make a request with bounded exponential-backoff retry
    async fn request_with_retry(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<ModelTurn> {
        let max_retries = self.config.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(messages, tools).await {
                Ok(turn) => return Ok(turn),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        error = %e,
                        "Model request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::ModelError {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSpec]>,
    ) -> Result<ModelTurn> {
        let tool_definitions = tools.map(|specs| {
            specs
                .iter()
                .map(|spec| ToolDefinition {
                    kind: "function",
                    function: FunctionDefinition {
                        name: &spec.name,
                        description: &spec.description,
                        parameters: serde_json::json!({
                            "type": "object",
                            "properties": {
                                "query": { "type": "string" }
                            },
                            "required": ["query"]
                        }),
                    },
                })
                .collect()
        });

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools: tool_definitions,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| AppError::ModelError {
            message: format!("Request failed: {}", e),
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ModelError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| AppError::ModelError {
                message: format!("Failed to parse response: {}", e),
            })?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ModelError {
                message: "Empty response from model".to_string(),
            })?;

        let tool_call = choice
            .message
            .tool_calls
            .into_iter()
            .next()
            .map(|call| ToolCall {
                name: call.function.name,
                arguments: call.function.arguments,
            });

        Ok(ModelTurn {
            content: choice.message.content.unwrap_or_default(),
            tool_call,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String> {
        let turn = self.request_with_retry(messages, None).await?;
        Ok(turn.content)
    }

    async fn invoke_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelTurn> {
        self.request_with_retry(messages, Some(tools)).await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Mock model for testing
///
/// Replies are scripted; when the script runs out the default reply is
/// returned. Every invocation is counted so tests can assert that a cache
/// hit performed no model call.
pub struct MockChatModel {
    replies: Mutex<VecDeque<ModelTurn>>,
    default_reply: String,
    fail_with: Option<String>,
    invocations: AtomicUsize,
}

impl MockChatModel {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.into(),
            fail_with: None,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Script an ordered sequence of turns ahead of the default reply
    pub fn with_turns(self, turns: Vec<ModelTurn>) -> Self {
        *self.replies.lock().unwrap() = turns.into();
        self
    }

    /// Make every invocation fail with the given message
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: String::new(),
            fail_with: Some(message.into()),
            invocations: AtomicUsize::new(0),
        }
    }

    /// Number of invocations performed so far
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn next_turn(&self) -> Result<ModelTurn> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(AppError::ModelError {
                message: message.clone(),
            });
        }
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ModelTurn {
                content: self.default_reply.clone(),
                tool_call: None,
            }))
    }
}

#[async_trait]
impl LanguageModel for MockChatModel {
    async fn invoke(&self, _messages: &[ChatMessage]) -> Result<String> {
        Ok(self.next_turn()?.content)
    }

    async fn invoke_with_tools(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<ModelTurn> {
        self.next_turn()
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

/// Create a language model based on configuration
pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match &config.api_key {
        Some(key) if !key.is_empty() => Ok(Arc::new(OpenAiChatModel::new(config.clone())?)),
        _ => {
            tracing::warn!("No model API key configured, using mock model");
            Ok(Arc::new(MockChatModel::new(
                "[Mock response - model API key not configured]",
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_scripted_replies() {
        let model = MockChatModel::new("default").with_turns(vec![ModelTurn {
            content: "first".to_string(),
            tool_call: None,
        }]);

        assert_eq!(model.invoke(&[ChatMessage::user("q")]).await.unwrap(), "first");
        assert_eq!(model.invoke(&[ChatMessage::user("q")]).await.unwrap(), "default");
        assert_eq!(model.invocations(), 2);
    }

    #[tokio::test]
    async fn test_mock_tool_turn() {
        let model = MockChatModel::new("n/a").with_turns(vec![ModelTurn {
            content: String::new(),
            tool_call: Some(ToolCall {
                name: "local_search".to_string(),
                arguments: "{\"query\":\"x\"}".to_string(),
            }),
        }]);

        let turn = model
            .invoke_with_tools(&[ChatMessage::user("q")], &[])
            .await
            .unwrap();
        assert_eq!(turn.tool_call.unwrap().name, "local_search");
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let model = MockChatModel::failing("connection reset");
        let err = model.invoke(&[ChatMessage::user("q")]).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
