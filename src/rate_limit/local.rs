use super::clock::Clock;
use super::store::{CounterStore, TokenRequest, TokenState};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Per-key algorithm state
#[derive(Debug, Clone)]
enum Slot {
    Vacant,
    Log(BTreeSet<(u64, String)>),
    Counter(u64),
    Bucket { tokens: f64, last_refill_ms: u64 },
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    /// Unix milliseconds after which the entry is treated as absent
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn vacant() -> Self {
        Self {
            slot: Slot::Vacant,
            expires_at_ms: None,
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }

    /// Move the slot out, or `None` if it has expired. Leaves the entry vacant.
    fn take_live(&mut self, now_ms: u64) -> Option<Slot> {
        let expired = self.is_expired(now_ms);
        let slot = std::mem::replace(&mut self.slot, Slot::Vacant);
        if expired {
            self.expires_at_ms = None;
            None
        } else {
            Some(slot)
        }
    }
}

/// In-process counter store.
///
/// Each operation runs while holding the DashMap shard lock for its key, which
/// gives the same per-key atomicity a Redis script does. State only lives as
/// long as the process, so this store suits single-instance deployments and
/// tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of live keys, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry whose expiry has passed
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!("Purged {} expired rate limit entries", purged);
        }
        purged
    }

    /// Periodically purge expired entries until the store is dropped
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        clock: Arc<dyn Clock>,
        every: Duration,
    ) -> JoinHandle<()> {
        let store: Weak<MemoryStore> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                match store.upgrade() {
                    Some(store) => {
                        store.purge_expired(clock.now_millis());
                    }
                    None => break,
                }
            }
        })
    }

    /// Clear all entries (for testing)
    #[cfg(test)]
    pub fn clear(&self) {
        self.entries.clear();
    }
}

fn expiry(now_ms: u64, ttl_secs: u64) -> u64 {
    now_ms.saturating_add(ttl_secs.saturating_mul(1000))
}

/// Refill a bucket and try to take one token from it
pub(crate) fn token_step(tokens: f64, last_refill_ms: u64, request: &TokenRequest) -> TokenState {
    let elapsed_secs = request.now_ms.saturating_sub(last_refill_ms) as f64 / 1000.0;
    let refilled = (tokens + elapsed_secs * request.refill_per_sec).min(request.capacity);

    if refilled >= 1.0 {
        TokenState {
            allowed: true,
            tokens: refilled - 1.0,
        }
    } else {
        TokenState {
            allowed: false,
            tokens: refilled,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn record_timestamp(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        member: &str,
    ) -> Result<u64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(Entry::vacant);

        let mut log = match entry.take_live(now_ms) {
            Some(Slot::Log(log)) => log,
            _ => BTreeSet::new(),
        };
        if let Some(cutoff) = now_ms.checked_sub(window_ms) {
            log = log.split_off(&(cutoff + 1, String::new()));
        }
        log.insert((now_ms, member.to_string()));
        let count = log.len() as u64;

        entry.slot = Slot::Log(log);
        entry.expires_at_ms = Some(now_ms.saturating_add(window_ms));
        Ok(count)
    }

    async fn increment_window(&self, key: &str, now_ms: u64, ttl_secs: u64) -> Result<u64> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(Entry::vacant);

        let count = match entry.take_live(now_ms) {
            Some(Slot::Counter(count)) => count + 1,
            _ => {
                entry.expires_at_ms = Some(expiry(now_ms, ttl_secs));
                1
            }
        };

        entry.slot = Slot::Counter(count);
        Ok(count)
    }

    async fn take_token(&self, key: &str, request: TokenRequest) -> Result<TokenState> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(Entry::vacant);

        let (tokens, last_refill_ms) = match entry.take_live(request.now_ms) {
            Some(Slot::Bucket {
                tokens,
                last_refill_ms,
            }) => (tokens, last_refill_ms),
            _ => (request.capacity, request.now_ms),
        };

        let state = token_step(tokens, last_refill_ms, &request);
        entry.slot = Slot::Bucket {
            tokens: state.tokens,
            last_refill_ms: last_refill_ms.max(request.now_ms),
        };
        entry.expires_at_ms = Some(expiry(request.now_ms, request.ttl_secs));

        Ok(state)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
