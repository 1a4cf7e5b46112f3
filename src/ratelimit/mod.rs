//! Rate limiting logic and state management.

mod backend;
mod burst;
pub mod cleanup;
pub mod clock;
mod descriptor;
mod limiter;
pub mod rules;
pub mod store;

pub use backend::RateLimiterBackend;
pub use burst::{BurstProtection, BURST_PREFIX, SUSTAINED_PREFIX};
pub use cleanup::CleanupTask;
pub use clock::{Clock, ManualClock, SystemClock};
pub use descriptor::RequestKey;
pub use limiter::{effective_limit, retry_after_secs, RateLimitDecision, RateLimitResult, RateLimiter};
pub use rules::{
    match_endpoint_pattern, validate_config, EndpointPattern, EndpointPolicy, EndpointRule,
    EnvironmentSettings, PolicyResolver, PolicyTable, RateLimitConfig,
};
pub use store::{create_store, ExpiringStore, LruStore, RateLimitRecord, RateLimitStore, StoreKind};
