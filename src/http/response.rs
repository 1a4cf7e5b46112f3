//! Rejection responses and rate limit headers.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::ratelimit::{RateLimitDecision, RateLimitResult};

/// Deny text used when the matched policy has none.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

const ERROR_LABEL: &str = "Too Many Requests";

/// Limit applied to the request.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Window end, epoch milliseconds.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
/// Seconds until the window resets; sent on 429 only.
pub const X_RATELIMIT_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");

const EXPOSED_HEADERS: &str =
    "X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset, X-RateLimit-Window, Retry-After";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectionBody<'a> {
    error: &'a str,
    message: &'a str,
    limit: u64,
    remaining: u64,
    reset_time: i64,
    retry_after: u64,
}

/// Builds the 429 response for denied requests and the informational
/// headers for allowed ones.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    default_message: String,
    allow_origin: HeaderValue,
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self {
            default_message: DEFAULT_MESSAGE.to_string(),
            allow_origin: HeaderValue::from_static("*"),
        }
    }
}

impl ResponseBuilder {
    /// Builder with the stock message and a wildcard allowed origin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Message used when the matched policy does not set one.
    pub fn with_default_message(mut self, message: impl Into<String>) -> Self {
        self.default_message = message.into();
        self
    }

    /// `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`
    /// for a decision. Attaching them to a success response is up to the
    /// caller.
    pub fn informational_headers(&self, result: &RateLimitResult) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_time));
        headers
    }

    /// The complete 429 response for a denied decision.
    pub fn rejection(&self, decision: &RateLimitDecision) -> Response {
        let result = &decision.result;
        let message = decision.message().unwrap_or(&self.default_message);

        let body = RejectionBody {
            error: ERROR_LABEL,
            message,
            limit: result.limit,
            remaining: result.remaining,
            reset_time: result.reset_time,
            retry_after: result.retry_after,
        };

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

        let headers = response.headers_mut();
        headers.extend(self.informational_headers(result));
        headers.insert(X_RATELIMIT_WINDOW, HeaderValue::from(result.retry_after));
        headers.insert(header::RETRY_AFTER, HeaderValue::from(result.retry_after));
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization"),
        );
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSED_HEADERS),
        );

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{RateLimitConfig, RequestKey};
    use axum::body::to_bytes;

    fn denied(message: Option<&str>) -> RateLimitDecision {
        let mut config = RateLimitConfig::new(5, 60_000);
        config.message = message.map(str::to_string);

        RateLimitDecision {
            key: RequestKey::new("203.0.113.1:0", "/items", "GET"),
            result: RateLimitResult {
                allowed: false,
                limit: 5,
                remaining: 0,
                reset_time: 1_700_000_060_000,
                retry_after: 42,
            },
            config,
        }
    }

    fn header<'a>(response: &'a Response, name: &str) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn test_rejection_status_and_headers() {
        let response = ResponseBuilder::new().rejection(&denied(None));

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, "X-RateLimit-Limit"), "5");
        assert_eq!(header(&response, "X-RateLimit-Remaining"), "0");
        assert_eq!(header(&response, "X-RateLimit-Reset"), "1700000060000");
        assert_eq!(header(&response, "X-RateLimit-Window"), "42");
        assert_eq!(header(&response, "Retry-After"), "42");
        assert_eq!(header(&response, "Access-Control-Allow-Origin"), "*");
        assert!(header(&response, "Access-Control-Expose-Headers").contains("Retry-After"));
        assert_eq!(header(&response, "Content-Type"), "application/json");
    }

    #[tokio::test]
    async fn test_rejection_body() {
        let response = ResponseBuilder::new().rejection(&denied(Some("Slow down")));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["message"], "Slow down");
        assert_eq!(body["limit"], 5);
        assert_eq!(body["remaining"], 0);
        assert_eq!(body["resetTime"], 1_700_000_060_000i64);
        assert_eq!(body["retryAfter"], 42);
    }

    #[tokio::test]
    async fn test_rejection_default_message() {
        let builder = ResponseBuilder::new().with_default_message("Busy");
        let response = builder.rejection(&denied(None));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["message"], "Busy");
    }

    #[test]
    fn test_informational_headers() {
        let decision = denied(None);
        let headers = ResponseBuilder::new().informational_headers(&decision.result);

        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "5");
    }
}
