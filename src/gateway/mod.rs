//! HTTP control API.
//!
//! Every response is JSON with a `success` flag and the session id it
//! concerns; failures carry an `error` string (see [`ApiError`]).

mod error;
mod handlers;

pub use error::ApiError;

use crate::config::GatewayConfig;
use crate::session::SessionManager;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub demo_endpoints: bool,
}

pub type SharedState = Arc<AppState>;

pub fn app(manager: Arc<SessionManager>, config: &GatewayConfig) -> Router {
    let state = Arc::new(AppState {
        manager,
        demo_endpoints: config.demo_endpoints,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status_query))
        .route("/status/{session_id}", get(handlers::status))
        .route("/qr", get(handlers::qr_query))
        .route("/qr/{session_id}", get(handlers::qr))
        .route("/pairing-code/{session_id}/{phone}", get(handlers::pairing_code))
        .route("/send-message", post(handlers::send_message))
        .route("/reconnect/{session_id}", post(handlers::reconnect))
        .route("/clear-session/{session_id}", post(handlers::clear_session))
        .route("/sessions", get(handlers::list_sessions))
        .route("/qr-quick/{session_id}", get(handlers::qr_quick))
        .route(
            "/quick-pairing-code/{session_id}/{phone}",
            get(handlers::quick_pairing_code),
        )
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(cors)
}

/// Serve the control API until `shutdown` resolves.
pub async fn run_gateway<F>(manager: Arc<SessionManager>, config: &GatewayConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind control API on {addr}"))?;
    let local = listener.local_addr()?;

    tracing::info!("Control API listening on http://{local}");
    if config.demo_endpoints {
        tracing::warn!("Demo endpoints enabled: /qr-quick and /quick-pairing-code return synthetic values");
    }
    crate::health::mark_component_ok("gateway");

    let result = axum::serve(listener, app(manager, config))
        .with_graceful_shutdown(shutdown)
        .await;
    if let Err(e) = &result {
        crate::health::mark_component_error("gateway", e);
    }
    result.context("Control API server failed")
}
