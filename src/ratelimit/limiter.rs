//! Core rate limiter implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::clock::Clock;
use super::descriptor::RequestKey;
use super::rules::{PolicyResolver, RateLimitConfig};
use super::store::RateLimitStore;
use crate::client::ClientIdentifier;
use crate::request::IncomingRequest;

/// Outcome of counting one request against one config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Effective cap used for this decision
    pub limit: u64,
    /// Requests left in the window under `limit`
    pub remaining: u64,
    /// Epoch ms at which the window ends
    pub reset_time: i64,
    /// Seconds until the window ends
    pub retry_after: u64,
}

/// A [`RateLimitResult`] together with the key and config that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Counter the request was charged to
    pub key: RequestKey,
    /// The decision
    pub result: RateLimitResult,
    /// Config the decision was made against
    pub config: RateLimitConfig,
}

impl RateLimitDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        self.result.allowed
    }

    /// Deny text configured for the matched policy.
    pub fn message(&self) -> Option<&str> {
        self.config.message.as_deref()
    }
}

/// The cap a request at position `count` is compared against.
///
/// The burst limit applies only while the count is at or below it; past that
/// the full `requests` cap is used.
pub fn effective_limit(config: &RateLimitConfig, count: u64) -> u64 {
    match config.burst_limit {
        Some(burst) if count <= burst => burst,
        _ => config.requests,
    }
}

/// Whole seconds from `now` until `reset_time`, rounded up.
pub fn retry_after_secs(reset_time: i64, now: i64) -> u64 {
    let remaining_ms = reset_time.saturating_sub(now);
    if remaining_ms <= 0 {
        return 0;
    }
    (remaining_ms as u64).div_ceil(1000)
}

/// Count a request against `key` and decide.
///
/// The counter is incremented before the comparison, so denied requests
/// consume quota too.
pub(crate) fn evaluate(
    store: &dyn RateLimitStore,
    clock: &dyn Clock,
    key: &str,
    config: &RateLimitConfig,
) -> RateLimitResult {
    let record = store.increment(key, config.window);
    let now = clock.now_ms();
    let limit = effective_limit(config, record.count);

    trace!(
        key = %key,
        count = record.count,
        limit = limit,
        reset_time = record.reset_time,
        "Evaluated rate limit"
    );

    RateLimitResult {
        allowed: record.count <= limit,
        limit,
        remaining: limit.saturating_sub(record.count),
        reset_time: record.reset_time,
        retry_after: retry_after_secs(record.reset_time, now),
    }
}

/// Single-window rate limiter: resolves the endpoint policy, derives the
/// client key and counts the request in the store.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policies: Arc<PolicyResolver>,
    identifier: ClientIdentifier,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter over an existing store and policy resolver.
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        policies: Arc<PolicyResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policies,
            identifier: ClientIdentifier::new(),
            clock,
        }
    }

    /// Use a custom client identifier.
    pub fn with_identifier(mut self, identifier: ClientIdentifier) -> Self {
        self.identifier = identifier;
        self
    }

    /// The store key a request is counted under.
    pub fn request_key(&self, request: &IncomingRequest) -> RequestKey {
        RequestKey::new(
            self.identifier.client_key(request),
            request.path(),
            request.method_str(),
        )
    }

    /// Count `request` and decide whether it may proceed.
    pub fn check(&self, request: &IncomingRequest) -> RateLimitDecision {
        let config = self.policies.resolve(request.path(), request.method_str());
        let key = self.request_key(request);
        let result = self.check_key(&key.to_string_key(), &config);

        if !result.allowed {
            debug!(
                key = %key,
                limit = result.limit,
                retry_after = result.retry_after,
                "Rate limit exceeded"
            );
        }

        RateLimitDecision {
            key,
            result,
            config,
        }
    }

    /// Count a request against an explicit store key and config.
    pub fn check_key(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        evaluate(self.store.as_ref(), self.clock.as_ref(), key, config)
    }

    /// Clear the counter `request` would be charged to.
    pub fn reset_request(&self, request: &IncomingRequest) {
        self.reset_key(&self.request_key(request).to_string_key());
    }

    /// Clear the counter for a store key.
    pub fn reset_key(&self, key: &str) {
        debug!(key = %key, "Resetting rate limit counter");
        self.store.reset(key);
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// The policy resolver.
    pub fn policies(&self) -> &Arc<PolicyResolver> {
        &self.policies
    }
}

#[async_trait]
impl RateLimiterBackend for RateLimiter {
    async fn check_request(&self, request: &IncomingRequest) -> RateLimitDecision {
        self.check(request)
    }

    fn stores(&self) -> Vec<Arc<dyn RateLimitStore>> {
        vec![self.store.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::{EndpointRule, PolicyTable, PRODUCTION_ENVIRONMENT};
    use crate::ratelimit::store::{create_store, StoreKind};
    use axum::http::{HeaderMap, Method, Uri};

    fn limiter_with(
        default: RateLimitConfig,
        endpoints: Vec<EndpointRule>,
    ) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(0));
        let store = create_store(StoreKind::Expiring, 1_000, clock.clone());
        let table = PolicyTable {
            default,
            endpoints,
            ..PolicyTable::default()
        };
        let policies = Arc::new(PolicyResolver::new(table, PRODUCTION_ENVIRONMENT));
        (clock.clone(), RateLimiter::new(store, policies, clock))
    }

    fn request(ip: &str, method: Method, path: &'static str) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", ip.parse().unwrap());
        headers.insert("user-agent", "test-agent/1.0".parse().unwrap());
        IncomingRequest::new(method, Uri::from_static(path), headers)
    }

    #[test]
    fn test_nth_request_allowed_next_denied() {
        let (_clock, limiter) = limiter_with(RateLimitConfig::new(5, 60_000), vec![]);
        let req = request("203.0.113.1", Method::GET, "/any");

        for i in 1..=5 {
            let decision = limiter.check(&req);
            assert!(decision.is_allowed(), "request {} should be allowed", i);
            assert_eq!(decision.result.remaining, 5 - i);
        }

        let decision = limiter.check(&req);
        assert!(!decision.is_allowed());
        assert_eq!(decision.result.remaining, 0);
        assert_eq!(decision.result.limit, 5);
    }

    #[test]
    fn test_window_rollover() {
        let (clock, limiter) = limiter_with(RateLimitConfig::new(2, 1_000), vec![]);
        let req = request("203.0.113.1", Method::GET, "/any");

        assert!(limiter.check(&req).is_allowed());
        clock.set(100);
        assert!(limiter.check(&req).is_allowed());
        clock.set(1_100);
        let decision = limiter.check(&req);
        assert!(decision.is_allowed());
        assert_eq!(decision.result.reset_time, 2_100);
    }

    #[test]
    fn test_clients_are_independent() {
        let (_clock, limiter) = limiter_with(RateLimitConfig::new(2, 60_000), vec![]);
        let a = request("203.0.113.1", Method::GET, "/any");
        let b = request("203.0.113.2", Method::GET, "/any");

        for _ in 0..3 {
            limiter.check(&a);
        }
        assert!(!limiter.check(&a).is_allowed());

        let decision = limiter.check(&b);
        assert!(decision.is_allowed());
        assert_eq!(decision.result.remaining, 1);
    }

    #[test]
    fn test_methods_and_paths_counted_separately() {
        let (_clock, limiter) = limiter_with(RateLimitConfig::new(1, 60_000), vec![]);

        assert!(limiter.check(&request("203.0.113.1", Method::GET, "/a")).is_allowed());
        assert!(limiter.check(&request("203.0.113.1", Method::POST, "/a")).is_allowed());
        assert!(limiter.check(&request("203.0.113.1", Method::GET, "/b")).is_allowed());
        assert!(!limiter.check(&request("203.0.113.1", Method::GET, "/a")).is_allowed());
    }

    #[test]
    fn test_denied_requests_consume_quota() {
        let (clock, limiter) = limiter_with(RateLimitConfig::new(1, 10_000), vec![]);
        let req = request("203.0.113.1", Method::GET, "/any");

        limiter.check(&req);
        limiter.check(&req);
        limiter.check(&req);

        let key = limiter.request_key(&req).to_string_key();
        assert_eq!(limiter.store().get(&key).map(|r| r.count), Some(3));

        // Still the same window: not extended by denied traffic
        clock.set(9_999);
        let decision = limiter.check(&req);
        assert!(!decision.is_allowed());
        assert_eq!(decision.result.reset_time, 10_000);
        assert_eq!(decision.result.retry_after, 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(10_000, 0), 10);
        assert_eq!(retry_after_secs(10_000, 1), 10);
        assert_eq!(retry_after_secs(10_000, 9_001), 1);
        assert_eq!(retry_after_secs(10_000, 10_000), 0);
        assert_eq!(retry_after_secs(10_000, 20_000), 0);
    }

    #[test]
    fn test_effective_limit_with_burst() {
        let config = RateLimitConfig::new(10, 60_000).with_burst_limit(3);

        assert_eq!(effective_limit(&config, 1), 3);
        assert_eq!(effective_limit(&config, 3), 3);
        assert_eq!(effective_limit(&config, 4), 10);
        assert_eq!(effective_limit(&RateLimitConfig::new(10, 60_000), 1), 10);
    }

    #[test]
    fn test_burst_limit_reports_tighter_cap() {
        let (_clock, limiter) = limiter_with(
            RateLimitConfig::new(4, 60_000).with_burst_limit(2),
            vec![],
        );
        let req = request("203.0.113.1", Method::GET, "/any");

        let first = limiter.check(&req).result;
        assert_eq!((first.allowed, first.limit, first.remaining), (true, 2, 1));
        let second = limiter.check(&req).result;
        assert_eq!((second.allowed, second.limit, second.remaining), (true, 2, 0));
        let third = limiter.check(&req).result;
        assert_eq!((third.allowed, third.limit, third.remaining), (true, 4, 1));
        limiter.check(&req);
        assert!(!limiter.check(&req).is_allowed());
    }

    #[test]
    fn test_endpoint_policy_and_message() {
        let (_clock, limiter) = limiter_with(
            RateLimitConfig::new(100, 60_000),
            vec![EndpointRule::new(
                "/items/[id]",
                RateLimitConfig::new(1, 60_000).with_message("Slow down"),
            )],
        );
        let req = request("203.0.113.1", Method::GET, "/items/42");

        limiter.check(&req);
        let decision = limiter.check(&req);
        assert!(!decision.is_allowed());
        assert_eq!(decision.message(), Some("Slow down"));
        assert_eq!(decision.key.path, "/items/42");
    }

    #[test]
    fn test_reset_request_clears_counter() {
        let (_clock, limiter) = limiter_with(RateLimitConfig::new(1, 60_000), vec![]);
        let req = request("203.0.113.1", Method::GET, "/any");

        limiter.check(&req);
        assert!(!limiter.check(&req).is_allowed());

        limiter.reset_request(&req);
        assert!(limiter.check(&req).is_allowed());
    }

    #[test]
    fn test_disabled_environment_never_denies() {
        let clock = Arc::new(ManualClock::new(0));
        let store = create_store(StoreKind::Lru, 100, clock.clone());
        let policies = Arc::new(PolicyResolver::new(PolicyTable::default(), "test"));
        let limiter = RateLimiter::new(store, policies, clock);
        let req = request("203.0.113.1", Method::POST, "/api/auth/login");

        for _ in 0..50 {
            assert!(limiter.check(&req).is_allowed());
        }
    }

    #[tokio::test]
    async fn test_backend_trait_delegates() {
        let (_clock, limiter) = limiter_with(RateLimitConfig::new(1, 60_000), vec![]);
        let backend: Arc<dyn RateLimiterBackend> = Arc::new(limiter);
        let req = request("203.0.113.1", Method::GET, "/any");

        assert!(backend.check_request(&req).await.is_allowed());
        assert!(!backend.check_request(&req).await.is_allowed());
        assert_eq!(backend.stores().len(), 1);
    }
}
