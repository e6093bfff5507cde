//! Hallucination detector abstraction
//!
//! Provides:
//! - A `HallucinationDetector` capability trait
//! - `HallucinationSpan`, the detector's span record
//! - An HTTP client for a remote span-detector service
//! - `MockDetector` for tests
//!
//! Span offsets are half-open **character** offsets into the answer string,
//! not byte offsets.

use crate::config::DetectorConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A suspected hallucinated substring of an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationSpan {
    /// Start character offset into the answer (inclusive)
    pub start: usize,
    /// End character offset into the answer (exclusive)
    pub end: usize,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// The exact answer substring
    pub text: String,
}

/// Capability trait for span-level hallucination detection
#[async_trait]
pub trait HallucinationDetector: Send + Sync {
    /// Detect hallucinated spans in an answer given its grounding context
    async fn predict(
        &self,
        context: &[String],
        question: &str,
        answer: &str,
    ) -> Result<Vec<HallucinationSpan>>;

    /// Get the detector model identifier
    fn model_name(&self) -> &str;
}

/// HTTP client for a remote span-detector service
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct DetectorRequest<'a> {
    context: &'a [String],
    question: &'a str,
    answer: &'a str,
    output_format: &'static str,
}

#[derive(Deserialize)]
struct DetectorResponse {
    #[serde(default)]
    spans: Vec<HallucinationSpan>,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        })
    }

    /// Retry budget: transient failures back off exponentially, client
    /// errors fail immediately
    fn retry_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..ExponentialBackoff::default()
        }
    }

    async fn predict_once(
        &self,
        request: &DetectorRequest<'_>,
    ) -> std::result::Result<Vec<HallucinationSpan>, backoff::Error<AppError>> {
        let url = format!("{}/predict", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                backoff::Error::transient(AppError::DetectorError {
                    message: format!("Request failed: {}", e),
                })
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = AppError::DetectorError {
                message: format!("Detector service error {}: {}", status, body),
            };
            return Err(if status.is_server_error() {
                backoff::Error::transient(error)
            } else {
                backoff::Error::permanent(error)
            });
        }

        let result: DetectorResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(AppError::DetectorError {
                message: format!("Failed to parse response: {}", e),
            })
        })?;

        Ok(result.spans)
    }
}

#[async_trait]
impl HallucinationDetector for HttpDetector {
    async fn predict(
        &self,
        context: &[String],
        question: &str,
        answer: &str,
    ) -> Result<Vec<HallucinationSpan>> {
        let request = DetectorRequest {
            context,
            question,
            answer,
            output_format: "spans",
        };

        backoff::future::retry(self.retry_policy(), || self.predict_once(&request)).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock detector for testing
pub struct MockDetector {
    spans: Vec<HallucinationSpan>,
    fail_with: Option<String>,
}

impl MockDetector {
    /// A detector that always returns the given spans
    pub fn with_spans(spans: Vec<HallucinationSpan>) -> Self {
        Self {
            spans,
            fail_with: None,
        }
    }

    /// A detector that never finds anything
    pub fn empty() -> Self {
        Self::with_spans(Vec::new())
    }

    /// A detector whose every call fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            spans: Vec::new(),
            fail_with: Some(message.into()),
        }
    }
}

#[async_trait]
impl HallucinationDetector for MockDetector {
    async fn predict(
        &self,
        _context: &[String],
        _question: &str,
        _answer: &str,
    ) -> Result<Vec<HallucinationSpan>> {
        if let Some(message) = &self.fail_with {
            return Err(AppError::DetectorError {
                message: message.clone(),
            });
        }
        Ok(self.spans.clone())
    }

    fn model_name(&self) -> &str {
        "mock-detector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_detector_spans() {
        let detector = MockDetector::with_spans(vec![HallucinationSpan {
            start: 0,
            end: 4,
            confidence: 0.9,
            text: "1687".to_string(),
        }]);

        let spans = detector.predict(&["ctx".to_string()], "q", "1687").await.unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "1687");
    }

    #[tokio::test]
    async fn test_mock_detector_failure() {
        let detector = MockDetector::failing("model not loaded");
        let err = detector.predict(&[], "q", "a").await.unwrap_err();
        assert!(err.to_string().contains("model not loaded"));
    }

    #[test]
    fn test_span_deserializes_from_detector_payload() {
        let json = "{\"start\":8,\"end\":14,\"confidence\":0.8,\"text\":\"B is C\"}";
        let span: HallucinationSpan = serde_json::from_str(json).unwrap();
        assert_eq!(span.start, 8);
        assert_eq!(span.end, 14);
    }
}
