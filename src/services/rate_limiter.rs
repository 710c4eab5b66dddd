//! Rate Limiter Service
//!
//! Fixed-window request budgets per (route, identity) pair, backed by the
//! shared counter store. The store's atomic windowed increment is the only
//! synchronization primitive; there is no in-process bookkeeping, so every
//! node sharing the store enforces one global budget.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::services::counter_store::{CounterStore, CounterStoreError};

/// Errors that can occur during admission control
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for route '{route}'. Retry after {retry_after} seconds")]
    LimitExceeded {
        route: String,
        limit: u64,
        /// Counter value at rejection, recorded as the ban strike count
        count: u64,
        retry_after: u64,
    },

    /// Counter-store failures are surfaced, never masked: admission control
    /// fails closed when the store is degraded.
    #[error("Counter store error: {0}")]
    Store(#[from] CounterStoreError),
}

/// Budget configuration for one fixed window
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u64,
    /// Window length; the counter resets entirely when it elapses
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// Remaining budget advertised to admitted callers
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the current window expires
    pub reset_secs: u64,
}

/// Fixed-window rate limiter over a shared counter store
#[derive(Clone)]
pub struct RateLimiterService {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiterService {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Count this request against the (route, identity) budget.
    ///
    /// Returns the remaining budget on admission, `LimitExceeded` once the
    /// post-increment count passes the maximum, and `Store` when the counter
    /// store itself fails (callers must reject in that case too).
    pub async fn check(
        &self,
        route: &str,
        identity: &str,
    ) -> Result<RateLimitStatus, RateLimitError> {
        let key = format!("rl:{route}:{identity}");

        let window = self
            .store
            .incr_with_expiry(&key, self.config.window)
            .await?;

        let reset_secs = window.ttl.as_secs().max(1);

        if window.count > self.config.max_requests {
            return Err(RateLimitError::LimitExceeded {
                route: route.to_string(),
                limit: self.config.max_requests,
                count: window.count,
                retry_after: reset_secs,
            });
        }

        Ok(RateLimitStatus {
            limit: self.config.max_requests,
            remaining: self.config.max_requests - window.count,
            reset_secs,
        })
    }
}
