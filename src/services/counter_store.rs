//! Shared Counter Store
//!
//! Capability interface over the shared atomic state used by admission
//! control: fixed-window request counters and the per-day ban list. The
//! store is always injected through construction so tests can substitute
//! the in-memory implementation for the Redis one.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{cmd, pipe, AsyncCommands};
use deadpool_redis::{Config as RedisPoolConfig, Connection, Pool, Runtime};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Errors surfaced by counter-store operations
#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error("Counter store connection failed: {0}")]
    Connection(String),

    #[error("Counter store operation failed: {0}")]
    Operation(String),
}

/// Result of an atomic windowed increment
#[derive(Debug, Clone, Copy)]
pub struct WindowCount {
    /// Counter value after the increment
    pub count: u64,
    /// Time remaining until the window expires
    pub ttl: Duration,
}

/// Atomic shared state for admission control.
///
/// `incr_with_expiry` must guarantee that every live counter eventually
/// expires: if the increment created the key, or the key somehow lost its
/// expiry (a crash between INCR and EXPIRE on a previous request), the
/// window TTL is (re)assigned in the same call.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter at `key`, assigning the window TTL
    /// when the key is new or has no expiry. Returns the post-increment
    /// count and the remaining window time.
    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, CounterStoreError>;

    /// Append an entry to the shared list at `key`
    async fn push_entry(&self, key: &str, value: &str) -> Result<(), CounterStoreError>;

    /// Atomically read and clear the shared list at `key`
    async fn drain_entries(&self, key: &str) -> Result<Vec<String>, CounterStoreError>;
}

/// Redis-backed counter store for multi-node deployments.
///
/// Uses a pooled connection per operation; all atomicity is delegated to
/// Redis primitives (INCR, RPUSH, and a MULTI/EXEC LRANGE+DEL pair).
pub struct RedisCounterStore {
    pool: Pool,
    key_prefix: String,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisCounterStore {
    /// Create a store from a Redis URL, verifying connectivity up front
    pub async fn new(url: &str) -> Result<Self, CounterStoreError> {
        let pool = RedisPoolConfig::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CounterStoreError::Connection(e.to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| CounterStoreError::Connection(e.to_string()))?;
        let _: () = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| CounterStoreError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            key_prefix: "stockledger:".to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_conn(&self) -> Result<Connection, CounterStoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| CounterStoreError::Connection(e.to_string()))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, CounterStoreError> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        let count: u64 = conn
            .incr(&full_key, 1)
            .await
            .map_err(|e| CounterStoreError::Operation(e.to_string()))?;

        // TTL returns -1 for a key with no expiry and -2 for a missing key.
        // Either way the window must be (re)assigned so the entry cannot
        // outlive its window.
        let mut ttl_secs: i64 = cmd("TTL")
            .arg(&full_key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| CounterStoreError::Operation(e.to_string()))?;

        if count == 1 || ttl_secs < 0 {
            let _: () = conn
                .expire(&full_key, window.as_secs() as i64)
                .await
                .map_err(|e| CounterStoreError::Operation(e.to_string()))?;
            ttl_secs = window.as_secs() as i64;
        }

        Ok(WindowCount {
            count,
            ttl: Duration::from_secs(ttl_secs.max(0) as u64),
        })
    }

    async fn push_entry(&self, key: &str, value: &str) -> Result<(), CounterStoreError> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        let _: () = conn
            .rpush(&full_key, value)
            .await
            .map_err(|e| CounterStoreError::Operation(e.to_string()))?;

        Ok(())
    }

    async fn drain_entries(&self, key: &str) -> Result<Vec<String>, CounterStoreError> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        // LRANGE + DEL inside MULTI/EXEC so concurrent pushes never land
        // between the read and the clear.
        let (entries, _deleted): (Vec<String>, i64) = pipe()
            .atomic()
            .lrange(&full_key, 0, -1)
            .del(&full_key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| CounterStoreError::Operation(e.to_string()))?;

        Ok(entries)
    }
}

#[derive(Debug, Clone)]
struct CounterEntry {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store for tests and single-node deployments.
///
/// Expiry is evaluated lazily on access; an expired counter behaves exactly
/// like a missing one.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: RwLock<HashMap<String, CounterEntry>>,
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_with_expiry(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, CounterStoreError> {
        let now = Instant::now();
        let mut counters = self.counters.write().await;

        let entry = counters.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at: now + window,
        });

        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + window;
        }

        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            ttl: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn push_entry(&self, key: &str, value: &str) -> Result<(), CounterStoreError> {
        let mut lists = self.lists.write().await;
        lists.entry(key.to_string()).or_default().push(value.to_string());
        Ok(())
    }

    async fn drain_entries(&self, key: &str) -> Result<Vec<String>, CounterStoreError> {
        let mut lists = self.lists.write().await;
        Ok(lists.remove(key).unwrap_or_default())
    }
}
