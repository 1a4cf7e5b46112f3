//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::RateLimitState;
use super::response::ResponseBuilder;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::RateLimiterBackend;

/// HTTP server fronting a router with rate limiting.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    backend: Arc<dyn RateLimiterBackend>,
    /// Builder for 429 responses
    responses: ResponseBuilder,
}

impl HttpServer {
    /// Create a new HTTP server around a rate limiter backend.
    pub fn new(addr: SocketAddr, backend: Arc<dyn RateLimiterBackend>) -> Self {
        Self {
            addr,
            backend,
            responses: ResponseBuilder::new(),
        }
    }

    /// Use a custom response builder.
    pub fn with_responses(mut self, responses: ResponseBuilder) -> Self {
        self.responses = responses;
        self
    }

    /// `routes` behind the rate limiting middleware.
    pub fn router(&self, routes: Router) -> Router {
        RateLimitState::new(self.backend.clone(), self.responses.clone()).layer(routes)
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, routes: Router, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router(routes);
        let listener = TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TurnstileError::Io(e)
        })
    }
}

/// Routes served by the standalone binary: a health check, and a catch-all
/// that answers 200 for any request the limiter lets through.
pub fn decision_routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(allowed)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn allowed(req: Request) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "allowed",
            "method": req.method().as_str(),
            "path": req.uri().path(),
        })),
    )
}
