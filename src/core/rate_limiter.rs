//! Per-client admission control built atop `governor`.
//!
//! One token bucket per [`ClientIdentity`], refilled at `rate` tokens per
//! second up to `burst`, seeded full on first sight. `governor` stores the
//! buckets in a sharded map and updates each one with a compare-and-swap,
//! so a check-refill-consume on one key never double-spends a token and
//! never blocks callers with other keys.
//!
//! Buckets that have fully refilled carry no information and are dropped by
//! [`ClientRateLimiter::evict_idle`]; the gateway runs it periodically so the
//! map does not grow with every client ever seen.
use std::{num::NonZeroU32, sync::Arc, time::Duration};

use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    config::models::RateLimitSettings, core::context::ClientIdentity, metrics,
    utils::graceful_shutdown::ShutdownToken,
};

type KeyedLimiter = RateLimiter<ClientIdentity, DefaultKeyedStateStore<ClientIdentity>, DefaultClock>;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum RateLimitError {
    #[error("refill rate {0} is not a usable positive tokens-per-second value")]
    InvalidRate(f64),
    #[error("burst capacity must be greater than 0")]
    ZeroBurst,
    #[error("idle eviction interval must be greater than zero")]
    ZeroEvictionInterval,
}

/// Time to replenish one token at `rate` tokens per second.
///
/// Rejects rates whose period is zero or does not fit in a `Duration`.
pub fn refill_period(rate: f64) -> Result<Duration, RateLimitError> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(RateLimitError::InvalidRate(rate));
    }
    Duration::try_from_secs_f64(1.0 / rate)
        .ok()
        .filter(|period| !period.is_zero())
        .ok_or(RateLimitError::InvalidRate(rate))
}

/// Shared, cheaply cloneable per-client limiter.
#[derive(Clone)]
pub struct ClientRateLimiter {
    limiter: Arc<KeyedLimiter>,
    rate: f64,
    burst: u32,
}

impl ClientRateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Result<Self, RateLimitError> {
        Self::with_rate(settings.requests_per_second, settings.burst)
    }

    /// Build a limiter refilling `rate` tokens per second with capacity `burst`.
    pub fn with_rate(rate: f64, burst: u32) -> Result<Self, RateLimitError> {
        let period = refill_period(rate)?;
        let burst_nonzero = NonZeroU32::new(burst).ok_or(RateLimitError::ZeroBurst)?;

        let quota = Quota::with_period(period)
            .ok_or(RateLimitError::InvalidRate(rate))?
            .allow_burst(burst_nonzero);

        tracing::info!(rate, burst, "Creating per-client rate limiter");

        Ok(Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            rate,
            burst,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Consume one token for `key` if available.
    pub fn allow(&self, key: &ClientIdentity) -> bool {
        self.check(key).is_ok()
    }

    /// Like [`allow`](Self::allow) but reports how long until the next
    /// token becomes available on denial.
    pub fn check(&self, key: &ClientIdentity) -> Result<(), Duration> {
        self.limiter
            .check_key(key)
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }

    /// Number of buckets currently held.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Drop buckets that have refilled to capacity.
    pub fn evict_idle(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        let after = self.limiter.len();
        metrics::set_tracked_clients(after);
        before.saturating_sub(after)
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until shutdown.
    pub fn spawn_eviction(
        &self,
        interval: Duration,
        mut token: ShutdownToken,
    ) -> Result<JoinHandle<()>, RateLimitError> {
        if interval.is_zero() {
            return Err(RateLimitError::ZeroEvictionInterval);
        }
        let limiter = self.clone();
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle();
                        if evicted > 0 {
                            tracing::debug!(
                                evicted,
                                remaining = limiter.tracked_clients(),
                                "Evicted idle rate limiter buckets"
                            );
                        }
                    }
                    _ = token.wait_for_shutdown() => break,
                }
            }
            tracing::debug!("Rate limiter eviction task stopped");
        }))
    }
}
