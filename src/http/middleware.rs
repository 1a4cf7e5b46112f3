//! axum middleware placing a rate limiter in front of a router.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tracing::warn;

use super::response::ResponseBuilder;
use crate::client::anonymize_ip;
use crate::ratelimit::RateLimiterBackend;
use crate::request::IncomingRequest;

/// Shared state for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    backend: Arc<dyn RateLimiterBackend>,
    responses: Arc<ResponseBuilder>,
}

impl RateLimitState {
    /// Pair a backend with the builder used for its rejections.
    pub fn new(backend: Arc<dyn RateLimiterBackend>, responses: ResponseBuilder) -> Self {
        Self {
            backend,
            responses: Arc::new(responses),
        }
    }

    /// Wrap `router` so every request passes through the rate limiter.
    pub fn layer(self, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self, rate_limit_middleware))
    }
}

/// Rate limiting middleware for HTTP requests.
///
/// Allowed requests continue to the inner service and get the
/// `X-RateLimit-*` headers added to their response. Denied requests are
/// answered with 429 without reaching the inner service.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let incoming = IncomingRequest::from_http(&req);
    let decision = state.backend.check_request(&incoming).await;

    if decision.is_allowed() {
        let mut response = next.run(req).await;
        response
            .headers_mut()
            .extend(state.responses.informational_headers(&decision.result));
        return response;
    }

    let client_ip = decision
        .key
        .client
        .rsplit_once(':')
        .map_or(decision.key.client.as_str(), |(ip, _)| ip);

    warn!(
        client = %anonymize_ip(client_ip).unwrap_or_default(),
        path = %decision.key.path,
        method = %decision.key.method,
        limit = decision.result.limit,
        retry_after = decision.result.retry_after,
        "Rate limit exceeded"
    );

    state.responses.rejection(&decision)
}
