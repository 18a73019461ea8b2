use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::time::interval;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use call_session_cell::models::CallProvider;
use call_session_cell::services::{
    CallStateManager, DailyProviderFactory, NetworkMonitor, NetworkQualityMonitor,
    ProviderRegistry, RecoveryConfig,
};
use call_session_cell::CallSessionState;
use shared_config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting teleconsultation call API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Register call providers
    let mut providers = ProviderRegistry::new();
    match DailyProviderFactory::new(&config) {
        Ok(factory) => providers.register(Arc::new(factory)),
        Err(e) => warn!("Daily provider unavailable: {}", e),
    }

    let default_provider = config
        .preferred_call_provider
        .parse::<CallProvider>()
        .unwrap_or_else(|e| {
            warn!("{}, falling back to daily", e);
            CallProvider::Daily
        });

    // Network quality monitor, optionally fed by an HTTP probe
    let network = Arc::new(NetworkQualityMonitor::new());
    let _probe = config.network_probe_url.clone().map(|url| {
        network.spawn_probe(url, Duration::from_secs(config.network_probe_interval_secs))
    });

    let network_monitor: Arc<dyn NetworkMonitor> = network.clone();
    let manager = CallStateManager::new(
        RecoveryConfig::from_app_config(&config),
        default_provider,
        providers,
        Some(network_monitor),
    );

    // Periodically drop ended sessions past retention
    let cleanup_manager = manager.clone();
    let retention = Duration::from_secs(config.session_retention_secs);
    let cleanup_handle = tokio::spawn(async move {
        let mut cleanup_interval = interval(retention.max(Duration::from_secs(60)));
        loop {
            cleanup_interval.tick().await;
            let cleaned = cleanup_manager.cleanup_ended_sessions(retention).await;
            if cleaned > 0 {
                info!("Cleaned up {} ended call sessions", cleaned);
            } else {
                debug!("No ended call sessions to clean up");
            }
        }
    });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create shared state
    let state = CallSessionState::new(manager.clone(), config.clone());

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Shutdown signal received, ending active calls");
    cleanup_handle.abort();
    manager.shutdown().await;

    Ok(())
}
