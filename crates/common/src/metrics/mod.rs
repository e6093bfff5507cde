//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions for the answer pipeline.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all AnswerForge metrics
pub const METRICS_PREFIX: &str = "answerforge";

/// SLO-aligned histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
];

/// Buckets for model and detector calls (typically slower)
pub const MODEL_BUCKETS: &[f64] = &[
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Pipeline metrics
    describe_counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        Unit::Count,
        "Total questions processed by the pipeline"
    );

    describe_histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Pipeline stage latency in seconds"
    );

    describe_counter!(
        format!("{}_route_decisions_total", METRICS_PREFIX),
        Unit::Count,
        "Grader routing decisions"
    );

    describe_gauge!(
        format!("{}_keyword_match_rate", METRICS_PREFIX),
        Unit::Count,
        "Keyword match rate between question and retrieved documents"
    );

    describe_counter!(
        format!("{}_sufficiency_repairs_total", METRICS_PREFIX),
        Unit::Count,
        "Sufficiency repair fallback searches attempted"
    );

    // Model metrics
    describe_counter!(
        format!("{}_model_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total language model invocations"
    );

    describe_histogram!(
        format!("{}_model_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Language model latency in seconds"
    );

    // Detector metrics
    describe_counter!(
        format!("{}_detector_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total hallucination detector invocations"
    );

    describe_gauge!(
        format!("{}_hallucination_spans", METRICS_PREFIX),
        Unit::Count,
        "Hallucinated spans found in the last evaluated answer"
    );

    // Streaming metrics
    describe_counter!(
        format!("{}_stream_chunks_total", METRICS_PREFIX),
        Unit::Count,
        "Chunks emitted by the streaming controller"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a completed pipeline stage
pub fn record_stage(stage: &str, strategy: &str, duration_secs: f64) {
    histogram!(
        format!("{}_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "strategy" => strategy.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a processed question
pub fn record_question(strategy: &str, cached: bool) {
    counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        "strategy" => strategy.to_string(),
        "cached" => cached.to_string()
    )
    .increment(1);
}

/// Helper to record a grader routing decision and its match-rate diagnostic
pub fn record_grade(route: &str, match_rate: f64) {
    counter!(
        format!("{}_route_decisions_total", METRICS_PREFIX),
        "route" => route.to_string()
    )
    .increment(1);

    gauge!(format!("{}_keyword_match_rate", METRICS_PREFIX)).set(match_rate);
}

/// Helper to record a sufficiency repair attempt
pub fn record_repair(recovered: bool) {
    counter!(
        format!("{}_sufficiency_repairs_total", METRICS_PREFIX),
        "recovered" => recovered.to_string()
    )
    .increment(1);
}

/// Helper to record model invocation metrics
pub fn record_model(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_model_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_model_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Helper to record detector invocation metrics
pub fn record_detection(span_count: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_detector_requests_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        gauge!(format!("{}_hallucination_spans", METRICS_PREFIX)).set(span_count as f64);
    }
}

/// Helper to record emitted stream chunks
pub fn record_stream_chunks(count: usize) {
    counter!(format!("{}_stream_chunks_total", METRICS_PREFIX)).increment(count as u64);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        let mut prev = 0.0;
        for &bucket in MODEL_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("POST", "/v2/ask");
        std::thread::sleep(std::time::Duration::from_millis(10));
        metrics.finish(200);
        // Just verify it runs without panic
    }

    #[test]
    fn test_stage_helpers_run() {
        record_stage("generate", "hybrid", 0.12);
        record_grade("generate", 0.5);
        record_repair(true);
        record_cache(true, "global");
    }
}
