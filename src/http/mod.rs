//! HTTP surface: rejection responses, axum middleware and the server.

mod middleware;
mod response;
mod server;

pub use middleware::{rate_limit_middleware, RateLimitState};
pub use response::{ResponseBuilder, DEFAULT_MESSAGE};
pub use server::{decision_routes, HttpServer};
