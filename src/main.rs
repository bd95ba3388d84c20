use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_crm_vision::config::Config;
use rust_crm_vision::extraction_service::ExtractionService;
use rust_crm_vision::handlers::{app_router, AppState};
use rust_crm_vision::session::SessionStore;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the session store and the extraction
/// client, then serves the capture API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_crm_vision=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let sessions = SessionStore::new(Duration::from_secs(config.session_ttl_secs));
    tracing::info!(
        "Session store initialized ({}s idle TTL)",
        config.session_ttl_secs
    );

    let extractor = ExtractionService::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize Gemini client: {}", e))?;
    tracing::info!(
        "✓ Gemini client initialized: {} ({} attempts, {}s deadline)",
        config.gemini_model,
        config.extraction_max_attempts,
        config.extraction_timeout_secs
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        sessions,
        extractor,
    });

    // Rate limiting: 5 req/sec per IP, burst of 10
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(5)
            .burst_size(10)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let app = app_router(app_state)
        .layer(
            ServiceBuilder::new()
                // Photos are large; the limit comes from MAX_UPLOAD_BYTES
                .layer(RequestBodyLimitLayer::new(config.max_upload_bytes))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
