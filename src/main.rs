use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_distress_leads::agents::default_agents;
use rust_distress_leads::config::Config;
use rust_distress_leads::db::Database;
use rust_distress_leads::db_storage::PropertyStore;
use rust_distress_leads::enrichment::EnrichmentChain;
use rust_distress_leads::handlers::{self, AppState};
use rust_distress_leads::orchestrator::Orchestrator;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool and the search pipeline
/// (agents, enrichment chain, property store), then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_distress_leads=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Wire the pipeline
    let agents = default_agents(&config)?;
    let enricher = Arc::new(EnrichmentChain::from_config(&config)?);
    tracing::info!(
        "Enrichment chain initialized (delay {}ms between records)",
        config.enrichment_delay_ms
    );
    let store = Arc::new(PropertyStore::new(db.pool.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        agents,
        enricher,
        store,
        config.upsert_batch_size,
    ));

    // Build application state
    let app_state = Arc::new(AppState {
        db,
        config: config.clone(),
        orchestrator,
    });

    // Configure rate limiter: 2 requests/second per IP, burst of 5. Searches are slow
    // and fan out to several upstream sites.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(5)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route("/api/v1/search", post(handlers::run_search))
        .route("/api/v1/sources", get(handlers::list_sources))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 64KB is plenty for search criteria
                .layer(RequestBodyLimitLayer::new(64 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
