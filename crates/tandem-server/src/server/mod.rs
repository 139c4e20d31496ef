use crate::config::ServerConfig;
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tandem_relay::{ConnectionRegistry, Relay};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

mod routes;

/// Server application state
pub struct AppState {
    /// Relay shared by every WebSocket session
    pub relay: Relay,
    /// Server configuration
    pub config: ServerConfig,
    /// Cancelled on shutdown; every connection's close token is a child of it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Relay::new(registry, config.relay.clone());
        Self {
            relay,
            config,
            shutdown,
        }
    }
}

/// Start the server and run until a shutdown signal arrives.
pub async fn start(config: ServerConfig) -> Result<()> {
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "Bound HTTP listener");

    let state = Arc::new(AppState::new(config, shutdown.clone()));

    tokio::spawn(shutdown_signal(shutdown));

    serve(listener, state).await
}

/// Serve the router on `listener` until `state.shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let stop_token = state.shutdown.clone();
    let app = create_router(state);

    let addr = listener.local_addr()?;
    info!("Starting Axum HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            stop_token.cancelled().await;
            info!("HTTP server received shutdown signal, draining connections");
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM, then cancel `token`.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received"),
        _ = terminate => info!("SIGTERM received"),
    }

    token.cancel();
}

/// Configure CORS layer.
///
/// With no configured origins, falls back to permissive CORS (suitable for
/// development).
fn configure_cors(origins: &[String]) -> CorsLayer {
    use tower_http::cors::AllowOrigin;

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if allowed.is_empty() {
        warn!("CORS origins configured but none parsed, falling back to permissive CORS");
        CorsLayer::permissive()
    } else {
        info!(origins = ?allowed, "Configured CORS with explicit allowed origins");
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = configure_cors(&state.config.cors_origins);
    let assets_router = routes::assets::router(&state.config.static_dir);
    let websocket_router = routes::websocket::router(state.clone());

    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .merge(websocket_router)
        .merge(assets_router)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
}

/// Health check endpoint (for load balancers)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "tandem-server",
            "version": env!("CARGO_PKG_VERSION"),
            "connections": state.relay.registry().connection_count(),
        })),
    )
}
