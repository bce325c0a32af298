use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Window used when no source configures one
pub const DEFAULT_WINDOW_SECS: u64 = 60;
/// Limit used when no source configures one
pub const DEFAULT_LIMIT: u32 = 100;
/// Longest accepted window (one year)
pub const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;
/// Rejection message used when no source configures one
pub const DEFAULT_MESSAGE: &str = "Too Many Requests";

/// Partial rate limit configuration.
///
/// Module defaults, scope overrides and route overrides are all expressed as a
/// `LimitOverride`. Unset fields inherit from the next less specific source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverride {
    /// Time window for the limit (in seconds)
    #[serde(default)]
    pub window_secs: Option<u64>,
    /// Maximum number of requests allowed per window
    #[serde(default)]
    pub limit: Option<u32>,
    /// Custom key fragment replacing the route identifier
    #[serde(default)]
    pub key: Option<String>,
    /// Message returned when the limit is exceeded
    #[serde(default)]
    pub message: Option<String>,
}

impl LimitOverride {
    /// Override both window and limit
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self {
            window_secs: Some(window_secs),
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Override only the limit
    pub fn limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Override only the window
    pub fn window_secs(window_secs: u64) -> Self {
        Self {
            window_secs: Some(window_secs),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Reject zero limits and windows outside `1..=MAX_WINDOW_SECS`
    pub fn validate(&self, origin: &str) -> Result<()> {
        if self.window_secs == Some(0) {
            return Err(GuardError::Config(format!(
                "Rate limit window must be > 0 for {}",
                origin
            )));
        }
        if matches!(self.window_secs, Some(window) if window > MAX_WINDOW_SECS) {
            return Err(GuardError::Config(format!(
                "Rate limit window must be at most {} seconds for {}",
                MAX_WINDOW_SECS, origin
            )));
        }
        if self.limit == Some(0) {
            return Err(GuardError::Config(format!(
                "Rate limit must be > 0 for {}",
                origin
            )));
        }
        if matches!(&self.key, Some(key) if key.is_empty()) {
            return Err(GuardError::Config(format!(
                "Rate limit key cannot be empty for {}",
                origin
            )));
        }
        Ok(())
    }

    /// Field-wise merge where `self` is the more specific source
    pub fn or(&self, fallback: &LimitOverride) -> LimitOverride {
        LimitOverride {
            window_secs: self.window_secs.or(fallback.window_secs),
            limit: self.limit.or(fallback.limit),
            key: self.key.clone().or_else(|| fallback.key.clone()),
            message: self.message.clone().or_else(|| fallback.message.clone()),
        }
    }
}

/// Fully merged configuration for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveLimit {
    pub window_secs: u64,
    pub limit: u32,
    pub key: Option<String>,
    pub message: String,
}

impl EffectiveLimit {
    /// Apply hard defaults to whatever is still unset
    pub fn from_override(merged: LimitOverride) -> Self {
        Self {
            window_secs: merged.window_secs.unwrap_or(DEFAULT_WINDOW_SECS),
            limit: merged.limit.unwrap_or(DEFAULT_LIMIT),
            key: merged.key,
            message: merged
                .message
                .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
        }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Quota snapshot produced by every algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests still permitted in the current window
    pub remaining: u32,
    /// Total limit
    pub limit: u32,
    /// When the quota resets (unix seconds)
    pub reset_time: u64,
    /// Whether this request exceeded the quota
    pub blocked: bool,
    /// When the check happened (unix seconds)
    pub checked_at: u64,
}

impl RateLimitInfo {
    /// Build a snapshot from a request count. The request that pushes the
    /// count past `limit` is the first one blocked.
    pub fn new(limit: u32, used: u64, reset_time: u64) -> Self {
        let remaining = (limit as u64).saturating_sub(used) as u32;
        Self {
            remaining,
            limit,
            reset_time,
            blocked: used > limit as u64,
            checked_at: 0,
        }
    }

    /// Build a snapshot from a token balance
    pub fn from_tokens(limit: u32, tokens: f64, blocked: bool, reset_time: u64) -> Self {
        let remaining = tokens.max(0.0).floor().min(limit as f64) as u32;
        Self {
            remaining,
            limit,
            reset_time,
            blocked,
            checked_at: 0,
        }
    }

    /// Record when the check happened
    pub fn at(mut self, now_secs: u64) -> Self {
        self.checked_at = now_secs;
        self
    }

    /// Seconds a rejected caller should wait, never less than one
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_time.saturating_sub(self.checked_at).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_merge_is_field_wise() {
        let method = LimitOverride::limit(5);
        let class = LimitOverride::new(50, 30).with_message("class message");

        let merged = method.or(&class);
        assert_eq!(merged.limit, Some(5));
        assert_eq!(merged.window_secs, Some(30));
        assert_eq!(merged.message.as_deref(), Some("class message"));
        assert_eq!(merged.key, None);
    }

    #[test]
    fn test_effective_limit_defaults() {
        let effective = EffectiveLimit::from_override(LimitOverride::default());
        assert_eq!(effective.window_secs, DEFAULT_WINDOW_SECS);
        assert_eq!(effective.limit, DEFAULT_LIMIT);
        assert_eq!(effective.message, DEFAULT_MESSAGE);
        assert_eq!(effective.window(), Duration::from_secs(60));
    }

    #[test]
    fn test_override_validation() {
        assert!(LimitOverride::new(10, 60).validate("test").is_ok());
        assert!(LimitOverride::limit(0).validate("test").is_err());
        assert!(LimitOverride::window_secs(0).validate("test").is_err());
        assert!(LimitOverride::window_secs(MAX_WINDOW_SECS).validate("test").is_ok());
        assert!(LimitOverride::window_secs(MAX_WINDOW_SECS + 1)
            .validate("test")
            .is_err());
        assert!(LimitOverride::window_secs(u64::MAX / 100)
            .validate("test")
            .is_err());
        assert!(LimitOverride::default().with_key("").validate("test").is_err());
    }

    #[test]
    fn test_rate_limit_info_counts() {
        let at_limit = RateLimitInfo::new(5, 5, 60);
        assert!(!at_limit.blocked);
        assert_eq!(at_limit.remaining, 0);

        let over = RateLimitInfo::new(5, 6, 60);
        assert!(over.blocked);
        assert_eq!(over.remaining, 0);

        let fresh = RateLimitInfo::new(5, 1, 60);
        assert!(!fresh.blocked);
        assert_eq!(fresh.remaining, 4);
    }

    #[test]
    fn test_rate_limit_info_tokens() {
        let info = RateLimitInfo::from_tokens(10, 4.7, false, 100);
        assert_eq!(info.remaining, 4);

        let empty = RateLimitInfo::from_tokens(10, 0.3, true, 100);
        assert_eq!(empty.remaining, 0);
        assert!(empty.blocked);
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let info = RateLimitInfo::new(1, 2, 100).at(100);
        assert_eq!(info.retry_after_secs(), 1);

        let info = RateLimitInfo::new(1, 2, 130).at(100);
        assert_eq!(info.retry_after_secs(), 30);
    }
}
