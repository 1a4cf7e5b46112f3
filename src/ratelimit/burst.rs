//! Two-window burst protection.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::backend::RateLimiterBackend;
use super::clock::Clock;
use super::descriptor::RequestKey;
use super::limiter::{evaluate, RateLimitDecision, RateLimitResult};
use super::rules::{validate_config, RateLimitConfig};
use super::store::RateLimitStore;
use crate::client::ClientIdentifier;
use crate::error::Result;
use crate::request::IncomingRequest;

/// Store key prefix for the short window.
pub const BURST_PREFIX: &str = "burst:";
/// Store key prefix for the long window.
pub const SUSTAINED_PREFIX: &str = "sustained:";

/// Enforces a short "burst" window and a long "sustained" window at once.
///
/// The burst window is checked first and, if it denies, decides alone; the
/// sustained window is only counted for requests that pass the burst check.
pub struct BurstProtection {
    burst: RateLimitConfig,
    sustained: RateLimitConfig,
    burst_store: Arc<dyn RateLimitStore>,
    sustained_store: Arc<dyn RateLimitStore>,
    identifier: ClientIdentifier,
    clock: Arc<dyn Clock>,
}

impl BurstProtection {
    /// Create burst protection over two independent stores.
    pub fn new(
        burst: RateLimitConfig,
        sustained: RateLimitConfig,
        burst_store: Arc<dyn RateLimitStore>,
        sustained_store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        validate_config(&burst)?;
        validate_config(&sustained)?;

        Ok(Self {
            burst,
            sustained,
            burst_store,
            sustained_store,
            identifier: ClientIdentifier::new(),
            clock,
        })
    }

    /// Use a custom client identifier.
    pub fn with_identifier(mut self, identifier: ClientIdentifier) -> Self {
        self.identifier = identifier;
        self
    }

    /// Count a request for `key` against both windows.
    pub fn check_key(&self, key: &str) -> RateLimitResult {
        self.check_windows(key).0
    }

    fn check_windows(&self, key: &str) -> (RateLimitResult, &RateLimitConfig) {
        let burst_key = format!("{}{}", BURST_PREFIX, key);
        let burst = evaluate(
            self.burst_store.as_ref(),
            self.clock.as_ref(),
            &burst_key,
            &self.burst,
        );

        if !burst.allowed {
            debug!(key = %key, limit = burst.limit, "Burst limit exceeded");
            return (burst, &self.burst);
        }

        let sustained_key = format!("{}{}", SUSTAINED_PREFIX, key);
        let sustained = evaluate(
            self.sustained_store.as_ref(),
            self.clock.as_ref(),
            &sustained_key,
            &self.sustained,
        );

        if !sustained.allowed {
            debug!(key = %key, limit = sustained.limit, "Sustained limit exceeded");
        }

        (
            RateLimitResult {
                allowed: burst.allowed && sustained.allowed,
                ..sustained
            },
            &self.sustained,
        )
    }

    /// Count `request` against both windows.
    pub fn check(&self, request: &IncomingRequest) -> RateLimitDecision {
        let key = RequestKey::new(
            self.identifier.client_key(request),
            request.path(),
            request.method_str(),
        );
        let (result, config) = self.check_windows(&key.to_string_key());

        RateLimitDecision {
            key,
            result,
            config: config.clone(),
        }
    }

    /// Clear both windows for a key.
    pub fn reset_key(&self, key: &str) {
        self.burst_store.reset(&format!("{}{}", BURST_PREFIX, key));
        self.sustained_store
            .reset(&format!("{}{}", SUSTAINED_PREFIX, key));
    }
}

#[async_trait]
impl RateLimiterBackend for BurstProtection {
    async fn check_request(&self, request: &IncomingRequest) -> RateLimitDecision {
        self.check(request)
    }

    fn stores(&self) -> Vec<Arc<dyn RateLimitStore>> {
        vec![self.burst_store.clone(), self.sustained_store.clone()]
    }
}
