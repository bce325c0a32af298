//! Counter store contract.
//!
//! Every method is a single atomic read-modify-write against the shared
//! store. Callers never read state and write it back in separate steps.

use crate::error::Result;
use async_trait::async_trait;

/// Parameters for one token bucket step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenRequest {
    /// Bucket capacity
    pub capacity: f64,
    /// Tokens added per second
    pub refill_per_sec: f64,
    /// Current time (unix milliseconds)
    pub now_ms: u64,
    /// Idle expiry for the bucket state (seconds)
    pub ttl_secs: u64,
}

/// Bucket state after one token bucket step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenState {
    /// Whether a token was consumed
    pub allowed: bool,
    /// Tokens left after the step
    pub tokens: f64,
}

/// Shared key/value + sorted-set store used by the rate limiting algorithms
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Drop log entries at or before `now_ms - window_ms`, append
    /// `(now_ms, member)`, refresh the key's expiry to the window and return
    /// the number of entries left in the log.
    async fn record_timestamp(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        member: &str,
    ) -> Result<u64>;

    /// Increment the counter at `key`, set its expiry to `ttl_secs` if it has
    /// none yet and return the new count.
    async fn increment_window(&self, key: &str, now_ms: u64, ttl_secs: u64) -> Result<u64>;

    /// Refill the bucket at `key`, consume one token if available, persist
    /// the result and return it.
    async fn take_token(&self, key: &str, request: TokenRequest) -> Result<TokenState>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<()>;
}
