//! Rate limiter trait for abstracting single-window and burst implementations.

use std::sync::Arc;

use async_trait::async_trait;

use super::limiter::RateLimitDecision;
use super::store::RateLimitStore;
use crate::request::IncomingRequest;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over both [`RateLimiter`](super::RateLimiter) and
/// [`BurstProtection`](super::BurstProtection) so the HTTP layer can work
/// with either.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Count `request` and decide whether it may proceed.
    async fn check_request(&self, request: &IncomingRequest) -> RateLimitDecision;

    /// Stores owned by this backend, for the background cleanup task.
    fn stores(&self) -> Vec<Arc<dyn RateLimitStore>>;
}
