use super::algorithm::{Algorithm, RateLimitAlgorithm};
use super::clock::{Clock, SystemClock};
use super::context::RequestContext;
use super::key::{KeyGenerator, KeyResolver};
use super::local::MemoryStore;
use super::registry::{ConfigResolver, LimitRegistry, Resolution, SkipPredicate, SkipReason};
use super::store::CounterStore;
use super::types::{EffectiveLimit, RateLimitInfo};
use crate::config::RateLimitOptions;
use crate::error::Result;
use crate::metrics::{self, Outcome};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Result of one rate limit decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No check was performed and the request is allowed
    Skipped(SkipReason),
    /// The algorithm ran against the store
    Evaluated {
        key: String,
        limit: EffectiveLimit,
        info: RateLimitInfo,
    },
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Evaluated { info, .. } if info.blocked)
    }

    pub fn info(&self) -> Option<&RateLimitInfo> {
        match self {
            Decision::Evaluated { info, .. } => Some(info),
            Decision::Skipped(_) => None,
        }
    }
}

/// Rate limit decision engine.
///
/// Resolves configuration, derives the key and runs the configured algorithm
/// against the shared counter store. Store errors are returned unchanged.
pub struct RateLimiterService {
    store: Arc<dyn CounterStore>,
    kind: RateLimitAlgorithm,
    algorithm: Arc<dyn Algorithm>,
    clock: Arc<dyn Clock>,
    config: ConfigResolver,
    keys: KeyResolver,
}

impl RateLimiterService {
    /// Start building a service from module options
    pub fn builder(options: RateLimitOptions) -> RateLimiterServiceBuilder {
        RateLimiterServiceBuilder {
            options,
            store: None,
            clock: None,
            registry: LimitRegistry::new(),
            skip_if: None,
            key_generator: None,
        }
    }

    /// Create a service backed by an in-process store
    pub fn local_only(options: RateLimitOptions) -> Result<Self> {
        Self::builder(options).build()
    }

    /// Decide whether a request may proceed
    pub async fn check(&self, ctx: &RequestContext) -> Result<Decision> {
        let limit = match self.config.resolve(ctx) {
            Resolution::Skip(reason) => {
                metrics::record_decision(self.kind.as_str(), Outcome::Skipped);
                return Ok(Decision::Skipped(reason));
            }
            Resolution::Apply(limit) => limit,
        };

        let key = self.keys.resolve(ctx, limit.key.as_deref());
        let now_ms = self.clock.now_millis();
        let started = Instant::now();

        let result = self
            .algorithm
            .check(
                self.store.as_ref(),
                &key,
                limit.window_secs,
                limit.limit,
                now_ms,
            )
            .await;

        metrics::record_check_duration(self.kind.as_str(), started.elapsed().as_secs_f64());

        let info = match result {
            Ok(info) => info.at(now_ms / 1000),
            Err(e) => {
                error!("Rate limit check failed for key {}: {}", key, e);
                metrics::record_store_error(self.kind.as_str());
                return Err(e);
            }
        };

        if info.blocked {
            warn!("Rate limit exceeded for key: {} ({})", key, self.kind);
            metrics::record_decision(self.kind.as_str(), Outcome::Blocked);
        } else {
            debug!(
                "Rate limit check passed for key {}: remaining={}, reset={}",
                key, info.remaining, info.reset_time
            );
            metrics::record_decision(self.kind.as_str(), Outcome::Allowed);
        }

        Ok(Decision::Evaluated { key, limit, info })
    }

    /// Check that the counter store is reachable
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    /// Algorithm used for every route
    pub fn algorithm(&self) -> RateLimitAlgorithm {
        self.kind
    }
}

/// Builder for [`RateLimiterService`]
pub struct RateLimiterServiceBuilder {
    options: RateLimitOptions,
    store: Option<Arc<dyn CounterStore>>,
    clock: Option<Arc<dyn Clock>>,
    registry: LimitRegistry,
    skip_if: Option<SkipPredicate>,
    key_generator: Option<KeyGenerator>,
}

impl RateLimiterServiceBuilder {
    /// Use a shared counter store (defaults to an in-process store)
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom clock (defaults to the system clock)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Scope and route overrides
    pub fn registry(mut self, registry: LimitRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Skip the check whenever `predicate` returns true
    pub fn skip_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        self.skip_if = Some(Arc::new(predicate));
        self
    }

    /// Replace key derivation with a custom generator
    pub fn key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&RequestContext) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    /// Validate configuration and assemble the service
    pub fn build(self) -> Result<RateLimiterService> {
        self.options.validate()?;

        let mut config =
            ConfigResolver::new(self.options.defaults(), self.registry, self.options.global)?;
        if let Some(predicate) = self.skip_if {
            config = config.with_skip_if(predicate);
        }

        let mut keys = KeyResolver::new(self.options.prefix.clone());
        if let Some(generator) = self.key_generator {
            keys = keys.with_generator(generator);
        }

        let store = self.store.unwrap_or_else(|| {
            info!("No counter store configured, using in-process store");
            Arc::new(MemoryStore::new())
        });

        let kind = self.options.algorithm;
        info!("Rate limiter ready (algorithm: {})", kind);

        Ok(RateLimiterService {
            store,
            kind,
            algorithm: kind.build(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            config,
            keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::clock::ManualClock;
    use crate::rate_limit::types::LimitOverride;
    use http::Method;

    const T0: u64 = 1_700_000_000_000;

    fn options(algorithm: RateLimitAlgorithm, limit: u32, window_secs: u64) -> RateLimitOptions {
        RateLimitOptions {
            algorithm,
            limit: Some(limit),
            window_secs: Some(window_secs),
            ..Default::default()
        }
    }

    fn ctx(ip: &str) -> RequestContext {
        RequestContext::new(Method::GET, "/api/items")
            .with_route("/api/items")
            .with_client_ip(ip)
    }

    #[tokio::test]
    async fn test_local_only_service() {
        let service =
            RateLimiterService::local_only(options(RateLimitAlgorithm::SlidingWindow, 10, 60))
                .unwrap();

        for _ in 0..10 {
            let decision = service.check(&ctx("192.168.1.1")).await.unwrap();
            assert!(!decision.is_blocked());
        }

        let decision = service.check(&ctx("192.168.1.1")).await.unwrap();
        assert!(decision.is_blocked());
        assert!(service.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_callers_are_counted_separately() {
        let service =
            RateLimiterService::local_only(options(RateLimitAlgorithm::FixedWindow, 2, 60))
                .unwrap();

        for _ in 0..2 {
            assert!(!service.check(&ctx("10.0.0.1")).await.unwrap().is_blocked());
        }
        assert!(service.check(&ctx("10.0.0.1")).await.unwrap().is_blocked());
        assert!(!service.check(&ctx("10.0.0.2")).await.unwrap().is_blocked());
    }

    #[tokio::test]
    async fn test_decision_carries_key_and_limit() {
        let clock = ManualClock::new(T0);
        let mut registry = LimitRegistry::new();
        registry
            .register_route(None, "/api/items", LimitOverride::limit(3).with_key("items"))
            .unwrap();

        let service = RateLimiterService::builder(options(RateLimitAlgorithm::TokenBucket, 10, 30))
            .clock(Arc::new(clock))
            .registry(registry)
            .build()
            .unwrap();

        match service.check(&ctx("10.0.0.1")).await.unwrap() {
            Decision::Evaluated { key, limit, info } => {
                assert_eq!(key, "ratelimit:items:10.0.0.1");
                assert_eq!(limit.limit, 3);
                assert_eq!(limit.window_secs, 30);
                assert_eq!(info.remaining, 2);
                assert_eq!(info.checked_at, T0 / 1000);
            }
            other => panic!("expected evaluation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_any_method_key_fragment_survives_exact_method_entry() {
        let mut registry = LimitRegistry::new();
        registry
            .register_route(None, "/api/items", LimitOverride::default().with_key("shared"))
            .unwrap()
            .register_route(Some(Method::GET), "/api/items", LimitOverride::limit(3))
            .unwrap();

        let service = RateLimiterService::builder(options(RateLimitAlgorithm::FixedWindow, 10, 60))
            .registry(registry)
            .build()
            .unwrap();

        match service.check(&ctx("1.2.3.4")).await.unwrap() {
            Decision::Evaluated { key, limit, .. } => {
                assert_eq!(key, "ratelimit:shared:1.2.3.4");
                assert_eq!(limit.limit, 3);
            }
            other => panic!("expected evaluation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_key_generator_groups_callers() {
        let service = RateLimiterService::builder(options(RateLimitAlgorithm::SlidingWindow, 1, 60))
            .key_generator(|_| "everyone".to_string())
            .build()
            .unwrap();

        assert!(!service.check(&ctx("10.0.0.1")).await.unwrap().is_blocked());
        assert!(service.check(&ctx("10.0.0.2")).await.unwrap().is_blocked());
    }

    #[tokio::test]
    async fn test_skip_predicate_short_circuits() {
        let service = RateLimiterService::builder(options(RateLimitAlgorithm::FixedWindow, 1, 60))
            .skip_if(|ctx| ctx.headers.contains_key("X-Internal"))
            .build()
            .unwrap();

        let mut internal = ctx("10.0.0.1");
        internal
            .headers
            .insert("X-Internal", http::HeaderValue::from_static("1"));

        for _ in 0..5 {
            let decision = service.check(&internal).await.unwrap();
            assert_eq!(decision, Decision::Skipped(SkipReason::Predicate));
            assert!(decision.info().is_none());
        }
    }

    #[test]
    fn test_invalid_options_rejected() {
        assert!(RateLimiterService::local_only(options(RateLimitAlgorithm::FixedWindow, 0, 60)).is_err());
        assert!(RateLimiterService::local_only(options(RateLimitAlgorithm::FixedWindow, 5, 0)).is_err());
        assert!(RateLimiterService::local_only(options(
            RateLimitAlgorithm::SlidingWindow,
            5,
            u64::MAX / 100
        ))
        .is_err());
    }
}
