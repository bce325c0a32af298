use super::context::RequestContext;
use super::service::{Decision, RateLimiterService};
use super::types::RateLimitInfo;
use crate::config::{RateLimitOptions, StoreFailurePolicy};
use crate::error::{GuardError, Result};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
pub const RESET_HEADER: &str = "X-RateLimit-Reset";

/// Request guard wrapping the decision engine.
///
/// Installed once on the application router. Allowed requests continue to the
/// handler with quota headers added to the response; blocked requests are
/// answered with the rejection payload.
#[derive(Clone)]
pub struct RateLimitGuard {
    /// The decision engine
    service: Arc<RateLimiterService>,
    /// Status used for rejections
    status: StatusCode,
    /// Whether `X-Forwarded-For` identifies the caller
    trust_proxy: bool,
    /// What to do when the counter store fails
    on_store_error: StoreFailurePolicy,
}

impl RateLimitGuard {
    /// Create a guard; the rejection status is validated here
    pub fn new(service: Arc<RateLimiterService>, options: &RateLimitOptions) -> Result<Self> {
        Ok(Self {
            service,
            status: options.status()?,
            trust_proxy: options.trust_proxy,
            on_store_error: options.on_store_error,
        })
    }

    pub fn service(&self) -> &Arc<RateLimiterService> {
        &self.service
    }

    /// Wire the guard in front of every route of `router`.
    ///
    /// Uses `route_layer` so the matched route pattern is known when the guard
    /// runs, and unmatched paths fall through to the 404 handler unguarded.
    pub fn install<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.route_layer(middleware::from_fn_with_state(self, rate_limit_middleware))
    }

    /// Decide a request.
    ///
    /// `Ok(Some(info))` allows with quota headers, `Ok(None)` allows without
    /// them and `Err` aborts the request.
    pub async fn check(&self, ctx: &RequestContext) -> Result<Option<RateLimitInfo>> {
        match self.service.check(ctx).await {
            Ok(Decision::Skipped(reason)) => {
                debug!("Rate limit skipped for {} ({:?})", ctx.path, reason);
                Ok(None)
            }
            Ok(Decision::Evaluated { limit, info, .. }) => {
                if info.blocked {
                    Err(GuardError::TooManyRequests {
                        status: self.status,
                        message: limit.message,
                        info,
                    })
                } else {
                    Ok(Some(info))
                }
            }
            Err(e) => match self.on_store_error {
                StoreFailurePolicy::FailOpen => {
                    warn!("Counter store unavailable, allowing request: {}", e);
                    Ok(None)
                }
                StoreFailurePolicy::FailClosed => Err(e),
            },
        }
    }
}

/// Axum middleware function for rate limiting
pub async fn rate_limit_middleware(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_request(&request, guard.trust_proxy);

    match guard.check(&ctx).await {
        Ok(Some(info)) => {
            let mut response = next.run(request).await;
            write_quota_headers(response.headers_mut(), &info);
            response
        }
        Ok(None) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

/// Write the `X-RateLimit-*` headers for a quota snapshot
pub fn write_quota_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(info.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(info.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(info.reset_time));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::algorithm::RateLimitAlgorithm;
    use crate::rate_limit::store::{CounterStore, TokenRequest, TokenState};
    use async_trait::async_trait;
    use http::Method;

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn record_timestamp(&self, _: &str, _: u64, _: u64, _: &str) -> Result<u64> {
            Err(GuardError::Store("connection refused".to_string()))
        }

        async fn increment_window(&self, _: &str, _: u64, _: u64) -> Result<u64> {
            Err(GuardError::Store("connection refused".to_string()))
        }

        async fn take_token(&self, _: &str, _: TokenRequest) -> Result<TokenState> {
            Err(GuardError::Store("connection refused".to_string()))
        }

        async fn ping(&self) -> Result<()> {
            Err(GuardError::Store("connection refused".to_string()))
        }
    }

    fn guard(options: RateLimitOptions, failing: bool) -> RateLimitGuard {
        let mut builder = RateLimiterService::builder(options.clone());
        if failing {
            builder = builder.store(Arc::new(FailingStore));
        }
        RateLimitGuard::new(Arc::new(builder.build().unwrap()), &options).unwrap()
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Method::GET, "/api").with_client_ip("192.168.1.1")
    }

    #[test]
    fn test_write_quota_headers() {
        let mut headers = HeaderMap::new();
        write_quota_headers(&mut headers, &RateLimitInfo::new(100, 1, 1_700_000_060));

        assert_eq!(headers.get(LIMIT_HEADER).unwrap(), "100");
        assert_eq!(headers.get(REMAINING_HEADER).unwrap(), "99");
        assert_eq!(headers.get(RESET_HEADER).unwrap(), "1700000060");
    }

    #[tokio::test]
    async fn test_guard_rejects_with_configured_status_and_message() {
        let options = RateLimitOptions {
            algorithm: RateLimitAlgorithm::FixedWindow,
            limit: Some(1),
            message: Some("Slow down".to_string()),
            status_code: 503,
            ..Default::default()
        };
        let guard = guard(options, false);

        assert!(guard.check(&ctx()).await.unwrap().is_some());

        match guard.check(&ctx()).await {
            Err(GuardError::TooManyRequests { status, message, info }) => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(message, "Slow down");
                assert!(info.blocked);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fail_closed_propagates_store_error() {
        let guard = guard(RateLimitOptions::default(), true);

        let err = guard.check(&ctx()).await.unwrap_err();
        assert!(matches!(err, GuardError::Store(_)));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_fail_open_allows_without_headers() {
        let options = RateLimitOptions {
            on_store_error: StoreFailurePolicy::FailOpen,
            ..Default::default()
        };
        let guard = guard(options, true);

        assert_eq!(guard.check(&ctx()).await.unwrap(), None);
    }

    #[test]
    fn test_invalid_status_rejected() {
        let options = RateLimitOptions {
            status_code: 42,
            ..Default::default()
        };
        let service = Arc::new(RateLimiterService::local_only(RateLimitOptions::default()).unwrap());
        assert!(RateLimitGuard::new(service, &options).is_err());
    }
}
