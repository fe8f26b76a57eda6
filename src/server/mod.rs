pub mod handlers;
pub mod state;
pub mod url_validation;

use crate::config::Config;
use axum::{Router, routing::get};
use state::AppState;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the router: relay endpoint, health/metrics, and the fallback
/// redirect for mistaken relative requests.
pub fn build_router(state: AppState) -> Router {
    let relay_path = state.config.relay_path.clone();

    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::serve_metrics))
        .route(
            &relay_path,
            get(handlers::relay::relay_get)
                .post(handlers::relay::relay_post)
                .options(handlers::relay::preflight),
        )
        .fallback(handlers::fallback::redirect_to_relay)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    crate::metrics::init();
    let relay_path = config.relay_path.clone();
    let state = AppState::new(config)?;
    let app = build_router(state);

    // Bind TCP listener
    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("Relay listening on http://{}{}", addr, relay_path);

    // Peer addresses feed the loopback exception of the origin gate
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
