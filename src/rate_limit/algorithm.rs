//! Counting algorithms.
//!
//! Each algorithm turns one atomic [`CounterStore`] operation into a
//! [`RateLimitInfo`]. None of them hold state of their own.

use super::store::{CounterStore, TokenRequest};
use super::types::RateLimitInfo;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Rate limiting algorithm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitAlgorithm {
    /// Sliding window log (exact, no boundary artifact)
    #[default]
    SlidingWindow,
    /// Fixed window counter (cheap, allows bursts across boundaries)
    FixedWindow,
    /// Token bucket (smooth refill)
    TokenBucket,
}

impl RateLimitAlgorithm {
    /// Instantiate the algorithm
    pub fn build(self) -> Arc<dyn Algorithm> {
        match self {
            RateLimitAlgorithm::SlidingWindow => Arc::new(SlidingWindowLog),
            RateLimitAlgorithm::FixedWindow => Arc::new(FixedWindowCounter),
            RateLimitAlgorithm::TokenBucket => Arc::new(TokenBucket),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitAlgorithm::SlidingWindow => "sliding-window",
            RateLimitAlgorithm::FixedWindow => "fixed-window",
            RateLimitAlgorithm::TokenBucket => "token-bucket",
        }
    }
}

impl fmt::Display for RateLimitAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common contract for all counting algorithms
#[async_trait]
pub trait Algorithm: Send + Sync {
    /// Record one request against `key` and report the quota
    async fn check(
        &self,
        store: &dyn CounterStore,
        key: &str,
        window_secs: u64,
        limit: u32,
        now_ms: u64,
    ) -> Result<RateLimitInfo>;
}

/// Exact rate limiting via a timestamped log of recent requests
#[derive(Debug, Clone, Copy, Default)]
pub struct SlidingWindowLog;

#[async_trait]
impl Algorithm for SlidingWindowLog {
    async fn check(
        &self,
        store: &dyn CounterStore,
        key: &str,
        window_secs: u64,
        limit: u32,
        now_ms: u64,
    ) -> Result<RateLimitInfo> {
        let window_ms = window_secs.saturating_mul(1000);
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let count = store
            .record_timestamp(key, now_ms, window_ms, &member)
            .await?;
        let reset_time = now_ms.saturating_add(window_ms).div_ceil(1000);

        Ok(RateLimitInfo::new(limit, count, reset_time))
    }
}

/// Approximate rate limiting via clock-aligned counters
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWindowCounter;

impl FixedWindowCounter {
    /// Index of the window containing `now_ms`
    pub fn bucket(now_ms: u64, window_secs: u64) -> u64 {
        (now_ms / 1000) / window_secs
    }
}

#[async_trait]
impl Algorithm for FixedWindowCounter {
    async fn check(
        &self,
        store: &dyn CounterStore,
        key: &str,
        window_secs: u64,
        limit: u32,
        now_ms: u64,
    ) -> Result<RateLimitInfo> {
        let bucket = Self::bucket(now_ms, window_secs);
        let windowed_key = format!("{}:{}", key, bucket);

        let count = store
            .increment_window(&windowed_key, now_ms, window_secs)
            .await?;
        let reset_time = (bucket + 1).saturating_mul(window_secs);

        Ok(RateLimitInfo::new(limit, count, reset_time))
    }
}

/// Rate limiting via a continuously refilling pool of permits
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenBucket;

#[async_trait]
impl Algorithm for TokenBucket {
    async fn check(
        &self,
        store: &dyn CounterStore,
        key: &str,
        window_secs: u64,
        limit: u32,
        now_ms: u64,
    ) -> Result<RateLimitInfo> {
        let capacity = limit as f64;
        let refill_per_sec = capacity / window_secs as f64;

        let state = store
            .take_token(
                key,
                TokenRequest {
                    capacity,
                    refill_per_sec,
                    now_ms,
                    ttl_secs: window_secs.saturating_mul(2),
                },
            )
            .await?;

        // Estimated time at which the bucket is full again
        let now_secs = now_ms as f64 / 1000.0;
        let reset_time = (now_secs + (capacity - state.tokens).max(0.0) / refill_per_sec).ceil();

        Ok(RateLimitInfo::from_tokens(
            limit,
            state.tokens,
            !state.allowed,
            reset_time as u64,
        ))
    }
}
