use anyhow::Result;
use axum::{
    body::Body,
    http::Request,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokengate_federation::spawn_session_sweeper;
use tokengate_signing::SigningBackend;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod error;
mod extractors;
mod middleware;
mod state;


use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokengate_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let bind_address = config.bind_address;
    let sweep_interval = config.session_sweep_interval;
    tracing::info!("Starting tokengate server on {}", bind_address);

    let state = Arc::new(AppState::new(config).await?);
    tracing::info!(
        algorithm = %state.backend().algorithm(),
        key_id = %state.backend().key_id(),
        providers = ?state.flow.configured_providers(),
        audiences = ?state.config.audiences,
        "Services initialized"
    );

    let sweeper = spawn_session_sweeper(state.sessions.clone(), sweep_interval);

    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    state.backend().close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(api::health::health_check))
        .route("/readyz", get(api::health::readiness_check))
        // Login flow
        .route("/login", get(api::auth::login))
        .route("/callback", get(api::auth::callback))
        .route("/refresh", get(api::auth::refresh))
        .route("/logout", post(api::auth::logout))
        .route("/userinfo", get(api::userinfo::userinfo))
        // Keys
        .route("/keys", get(api::keys::jwks))
        .route("/.well-known/jwks.json", get(api::keys::jwks))
        .route("/.well-known/public_key.pem", get(api::keys::public_key_pem))
        // Add middleware
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(
            // Path only: query strings carry authorization codes
            TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::debug_span!("request", method = %req.method(), path = %req.uri().path())
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Graceful shutdown initiated");
}
