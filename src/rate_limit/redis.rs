use super::lua_scripts::{FIXED_WINDOW_SCRIPT, SLIDING_WINDOW_SCRIPT, TOKEN_BUCKET_SCRIPT};
use super::store::{CounterStore, TokenRequest, TokenState};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use tracing::{debug, error};

/// Redis-backed distributed counter store.
///
/// Each operation is one `EVALSHA` round trip, so the state update is atomic
/// across every process sharing the Redis instance.
#[derive(Clone)]
pub struct RedisStore {
    /// Redis connection manager (cheap to clone, reconnects on its own)
    connection: ConnectionManager,
    sliding_window: Script,
    fixed_window: Script,
    token_bucket: Script,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self::with_connection(connection))
    }

    /// Wrap an existing connection manager
    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            sliding_window: Script::new(SLIDING_WINDOW_SCRIPT),
            fixed_window: Script::new(FIXED_WINDOW_SCRIPT),
            token_bucket: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn record_timestamp(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        member: &str,
    ) -> Result<u64> {
        let mut connection = self.connection.clone();

        let count = self
            .sliding_window
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(member)
            .invoke_async::<_, u64>(&mut connection)
            .await
            .map_err(|e| {
                error!("Redis error during sliding window update for {}: {}", key, e);
                GuardError::from(e)
            })?;

        debug!("Sliding window log for key {} holds {} entries", key, count);
        Ok(count)
    }

    async fn increment_window(&self, key: &str, _now_ms: u64, ttl_secs: u64) -> Result<u64> {
        let mut connection = self.connection.clone();

        let count = self
            .fixed_window
            .key(key)
            .arg(ttl_secs)
            .invoke_async::<_, u64>(&mut connection)
            .await
            .map_err(|e| {
                error!("Redis error during fixed window increment for {}: {}", key, e);
                GuardError::from(e)
            })?;

        debug!("Fixed window counter for key {} is {}", key, count);
        Ok(count)
    }

    async fn take_token(&self, key: &str, request: TokenRequest) -> Result<TokenState> {
        let mut connection = self.connection.clone();

        let (allowed, tokens) = self
            .token_bucket
            .key(key)
            .arg(request.capacity)
            .arg(request.refill_per_sec)
            .arg(request.now_ms)
            .arg(request.ttl_secs)
            .invoke_async::<_, (i64, String)>(&mut connection)
            .await
            .map_err(|e| {
                error!("Redis error during token bucket update for {}: {}", key, e);
                GuardError::from(e)
            })?;

        let tokens = tokens.parse::<f64>().map_err(|e| {
            GuardError::Store(format!("Invalid token count '{}' for {}: {}", tokens, key, e))
        })?;

        debug!(
            "Token bucket for key {}: allowed={}, tokens={}",
            key,
            allowed == 1,
            tokens
        );

        Ok(TokenState {
            allowed: allowed == 1,
            tokens,
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // They are ignored by default. Run with: cargo test -- --ignored

    const REDIS_URL: &str = "redis://127.0.0.1:6379";

    fn unique_key(prefix: &str) -> String {
        format!("quota-guard:test:{}-{}", prefix, rand::random::<u32>())
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_connection() {
        let store = RedisStore::connect(REDIS_URL)
            .await
            .expect("Failed to connect to Redis");

        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_sliding_window_log() {
        let store = RedisStore::connect(REDIS_URL)
            .await
            .expect("Failed to connect to Redis");
        let key = unique_key("sw");
        let now = 1_700_000_000_000;

        assert_eq!(store.record_timestamp(&key, now, 10_000, "a").await.unwrap(), 1);
        assert_eq!(store.record_timestamp(&key, now, 10_000, "b").await.unwrap(), 2);
        assert_eq!(
            store.record_timestamp(&key, now + 10_000, 10_000, "c").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_fixed_window_counter() {
        let store = RedisStore::connect(REDIS_URL)
            .await
            .expect("Failed to connect to Redis");
        let key = unique_key("fw");

        for expected in 1..=5 {
            assert_eq!(store.increment_window(&key, 0, 60).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_token_bucket_keeps_fractions() {
        let store = RedisStore::connect(REDIS_URL)
            .await
            .expect("Failed to connect to Redis");
        let key = unique_key("tb");
        let now = 1_700_000_000_000;
        let request = |now_ms| TokenRequest {
            capacity: 2.0,
            refill_per_sec: 1.0,
            now_ms,
            ttl_secs: 4,
        };

        assert!(store.take_token(&key, request(now)).await.unwrap().allowed);
        assert!(store.take_token(&key, request(now)).await.unwrap().allowed);
        assert!(!store.take_token(&key, request(now)).await.unwrap().allowed);

        let partial = store.take_token(&key, request(now + 500)).await.unwrap();
        assert!(!partial.allowed);
        assert!((partial.tokens - 0.5).abs() < 1e-9);
    }
}
