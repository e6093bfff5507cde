//! AnswerForge API Gateway
//!
//! The entry point for all external API requests.
//! Handles:
//! - Question answering (one-shot and streamed)
//! - Answer evaluation
//! - Rate limiting
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use answerforge_agent::{
    strategy::{GLOBAL_TOOL, HYBRID_TOOL, LOCAL_TOOL, NAIVE_TOOL},
    HallucinationEvaluator, PipelineSettings, RetrievalPipeline, RetrievalStrategy, ToolSet,
};
use answerforge_common::{
    cache::{CacheConfig, CacheStore, GlobalCache, MemoryCache, RedisCache, SessionCache},
    config::AppConfig,
    detector::HttpDetector,
    errors::AppError,
    llm::create_language_model,
    metrics,
    search::create_search_provider,
};
use axum::{
    extract::Request,
    middleware::{from_fn, Next},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<RetrievalPipeline>,
    pub evaluator: Arc<HallucinationEvaluator>,
    pub session_cache: SessionCache,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting AnswerForge API Gateway v{}", answerforge_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .set_buckets_for_metric(
                Matcher::Suffix("_duration_seconds".to_string()),
                metrics::LATENCY_BUCKETS,
            )?
            .install()?;
        info!(port = config.observability.metrics_port, "Prometheus exporter started");
    }

    // Create app state
    let state = build_state(config.clone()).await?;

    // Build the router
    let app = create_router(state, &config);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wire the pipeline, evaluator, and cache tiers from configuration
async fn build_state(config: Arc<AppConfig>) -> Result<AppState, AppError> {
    // Strategy parsing fails fast on unsupported names
    let settings = PipelineSettings::from_config(&config.agent)?;
    let strategy = settings.strategy;

    // Cache backing: Redis by default, in-process when configured
    let store: Arc<dyn CacheStore> = if config.redis.memory_only {
        info!("Using in-process cache backend");
        Arc::new(MemoryCache::new())
    } else {
        info!(url = %config.redis.url, "Connecting to Redis...");
        Arc::new(
            RedisCache::new(CacheConfig {
                url: config.redis.url.clone(),
                default_ttl_secs: config.redis.default_ttl_secs,
                key_prefix: config.redis.key_prefix.clone(),
            })
            .await?,
        )
    };
    let session_cache = SessionCache::new(store.clone());
    let global_cache = GlobalCache::new(store);

    let llm = create_language_model(&config.llm)?;

    // Bind the strategy's tool set
    let search = &config.search;
    let tools = match strategy {
        RetrievalStrategy::Local => ToolSet::new(
            strategy,
            create_search_provider(
                search,
                LOCAL_TOOL,
                "Retrieves specific details: concrete facts, clauses, and procedures from the knowledge base.",
                "local",
            )?,
            None,
        )?,
        RetrievalStrategy::Global => ToolSet::new(
            strategy,
            create_search_provider(
                search,
                GLOBAL_TOOL,
                "Analyzes the knowledge base as a whole, returning a report assembled across dataset partitions.",
                "global",
            )?,
            None,
        )?,
        RetrievalStrategy::Hybrid => ToolSet::new(
            strategy,
            create_search_provider(
                search,
                HYBRID_TOOL,
                "Combined search over entities and topics; the right default for detail questions.",
                "hybrid",
            )?,
            Some(create_search_provider(
                search,
                GLOBAL_TOOL,
                "Analyzes the knowledge base as a whole, returning a report assembled across dataset partitions.",
                "global",
            )?),
        )?,
        RetrievalStrategy::Naive => ToolSet::new(
            strategy,
            create_search_provider(
                search,
                NAIVE_TOOL,
                "Basic retrieval returning the text fragments most similar to the question.",
                "naive",
            )?,
            None,
        )?,
    };

    // Sufficiency repair always falls back to local search
    let local_fallback = create_search_provider(
        search,
        LOCAL_TOOL,
        "Retrieves specific details: concrete facts, clauses, and procedures from the knowledge base.",
        "local",
    )?;

    let pipeline = Arc::new(RetrievalPipeline::new(
        settings,
        tools,
        local_fallback,
        llm,
        session_cache.clone(),
        global_cache,
    ));

    let detector = Arc::new(HttpDetector::new(&config.detector)?);
    let evaluator = Arc::new(HallucinationEvaluator::new(detector));

    info!(strategy = %strategy, "Pipeline initialized");

    Ok(AppState {
        config,
        pipeline,
        evaluator,
        session_cache,
    })
}

/// Create the main application router
fn create_router(state: AppState, config: &AppConfig) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Ask endpoints
        .route("/ask", post(handlers::ask::ask))
        .route("/ask/stream", post(handlers::ask::ask_stream))
        // Evaluation endpoint
        .route("/evaluate", post(handlers::evaluate::evaluate));

    let mut app = Router::new()
        // Health endpoints (no rate limiting)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v2", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id);

    if config.rate_limit.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        );
        app = app.layer(from_fn(move |request: Request, next: Next| {
            middleware::rate_limit::rate_limit_middleware(request, next, limiter.clone())
        }));
    }

    app.with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
