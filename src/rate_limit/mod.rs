//! Rate limiting module
//!
//! Request admission control backed by a shared counter store, with three
//! counting algorithms:
//!
//! - **Sliding Window Log**: Exact, no boundary artifact (default)
//! - **Fixed Window**: One counter per clock-aligned window
//! - **Token Bucket**: Smooth refill with burst support
//!
//! # Features
//!
//! - Per-key atomic updates in Redis (Lua scripts) or in-process
//! - Module defaults, scope overrides and route overrides merged per field
//! - Skip markers and a dynamic skip predicate
//! - Rate limit headers in responses (`X-RateLimit-*`)
//!
//! # Example
//!
//! ```rust,no_run
//! use quota_guard::config::RateLimitOptions;
//! use quota_guard::rate_limit::{
//!     LimitOverride, LimitRegistry, RateLimitAlgorithm, RateLimitGuard, RateLimiterService,
//! };
//! use axum::{routing::get, Router};
//! use std::sync::Arc;
//!
//! # fn main() -> quota_guard::error::Result<()> {
//! let options = RateLimitOptions {
//!     algorithm: RateLimitAlgorithm::FixedWindow,
//!     limit: Some(100),
//!     window_secs: Some(60),
//!     ..Default::default()
//! };
//!
//! let mut registry = LimitRegistry::new();
//! registry.register_route(None, "/login", LimitOverride::limit(5))?;
//!
//! let service = RateLimiterService::builder(options.clone())
//!     .registry(registry)
//!     .build()?;
//! let guard = RateLimitGuard::new(Arc::new(service), &options)?;
//!
//! let app: Router = guard.install(Router::new().route("/login", get(|| async { "ok" })));
//! # Ok(())
//! # }
//! ```

pub mod algorithm;
pub mod clock;
pub mod context;
pub mod key;
pub mod local;
pub mod lua_scripts;
pub mod middleware;
pub mod redis;
pub mod registry;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use algorithm::{Algorithm, FixedWindowCounter, RateLimitAlgorithm, SlidingWindowLog, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{CallerIdentity, RequestContext};
pub use key::KeyResolver;
pub use local::MemoryStore;
pub use middleware::{rate_limit_middleware, write_quota_headers, RateLimitGuard};
pub use redis::RedisStore;
pub use registry::{ConfigResolver, LimitRegistry, Resolution, SkipReason};
pub use service::{Decision, RateLimiterService};
pub use store::CounterStore;
pub use types::{EffectiveLimit, LimitOverride, RateLimitInfo};
