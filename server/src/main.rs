use std::{net::SocketAddr, sync::Arc};

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use narration_server::{config::ServerConfig, router, AppState};
use tts_core::{TtsConfig, TtsManager};
use vision_core::VisionClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting scene narration server...");

    let config = ServerConfig::from_env();

    let vision = VisionClient::from_env()?;
    info!("Vision model: {}", vision.model());

    let tts = TtsManager::new(TtsConfig::from_env())?;
    if tts.is_configured() {
        info!("Speech synthesis enabled (voice {})", tts.voice_id());
    } else {
        warn!("ELEVENLABS_API_KEY not set, results will be sent without audio");
    }

    let state = AppState::new(Arc::new(vision), Arc::new(tts), config.clone());
    info!(
        "Server configuration loaded: port={}, min_frame_interval={}ms, reject_policy={:?}, rate_limit={}/min",
        config.port, config.min_frame_interval_ms, config.reject_policy, config.rate_limit_per_minute
    );

    // CORS configuration - environment-aware
    let cors = match config.cors_allowed_origins.as_deref() {
        Some(allowed_origins) => {
            let origins: Vec<HeaderValue> = allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect();
            if origins.is_empty() {
                warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
                permissive_cors()
            } else {
                info!("CORS configured for {} origin(s)", origins.len());
                base_cors().allow_origin(tower_http::cors::AllowOrigin::list(origins))
            }
        }
        None => {
            warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
            permissive_cors()
        }
    };

    // Global rate limit: all clients share one bucket, which also behaves behind proxies
    let rate = config.rate_limit_per_minute.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(60_000 / u64::from(rate))
            .burst_size(rate)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration: {rate}/min"))?,
    );
    info!("Rate limiting: {} requests per minute", rate);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors)
        .into_inner();

    let app = router(state)
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr} (frames at ws://{addr}/ws)");
    axum::serve(listener, app).await?;
    Ok(())
}

fn base_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false)
}

fn permissive_cors() -> CorsLayer {
    base_cors().allow_origin(tower_http::cors::Any)
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", value);
        response
    } else {
        next.run(request).await
    }
}
