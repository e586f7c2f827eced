use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use vible_core::config::GatewayConfig;

use super::tracing::trace_id_middleware;
use super::{events, messages};
use crate::realtime::MessageDispatcher;
use crate::workflow::EventBus;

/// Shared handler state.
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<MessageDispatcher>,
    pub bus: EventBus,
    /// Interval between keep-alive comments on live streams.
    pub keep_alive: Duration,
    /// Ends open streams when the server shuts down.
    pub shutdown: CancellationToken,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Gateway HTTP server.
pub struct GatewayServer {
    config: GatewayConfig,
    state: GatewayState,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: GatewayState) -> Self {
        Self { config, state }
    }

    /// Build the Axum router.
    pub fn router(&self) -> Router {
        let cors = if self.config.cors_origins.iter().any(|o| o == "*") {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = self
                .config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/api/events", post(events::publish))
            .route("/api/message/send", post(messages::send))
            .route("/api/message/get", post(messages::thread))
            .route("/api/message/{user_id}", get(messages::subscribe))
            .route("/api/user/recent-messages", get(messages::recent))
            .with_state(self.state.clone())
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors)
                    .layer(middleware::from_fn(trace_id_middleware)),
            )
    }

    /// Get the socket address to bind to.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.config.port))
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn run(self) -> Result<(), std::io::Error> {
        let addr = self.addr();
        let router = self.router();
        let shutdown = self.state.shutdown.clone();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Gateway listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
