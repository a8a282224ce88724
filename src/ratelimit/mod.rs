//! Three-tier sliding-window rate limiting.
//!
//! Burst and daily quotas are keyed by client identity and evaluated concurrently; the global
//! quota is only consulted once both per-client checks pass, so a client that is already
//! throttled can never drain the shared budget.
//!
//! Counters live behind [`CounterStore`], which must evaluate a hit atomically: two concurrent
//! requests must not both pass when a single slot remains.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use log::{ debug, info, warn };
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{ Duration, SystemTime, UNIX_EPOCH };
use thiserror::Error as ThisError;

use crate::cli::Args;

/// Identity used for the single global counter.
pub const GLOBAL_IDENTITY: &str = "global";

#[derive(Debug, ThisError)]
pub enum RateLimitError {
    #[error("rate limit store error: {0}")]
    Store(String),
}

impl From<::redis::RedisError> for RateLimitError {
    fn from(err: ::redis::RedisError) -> Self {
        RateLimitError::Store(err.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Burst,
    Daily,
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Burst => "burst",
            Scope::Daily => "daily",
            Scope::Global => "global",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub window: Duration,
}

impl Quota {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    fn window_ms(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitKey {
    pub scope: Scope,
    pub identity: String,
}

impl RateLimitKey {
    pub fn new(scope: Scope, identity: impl Into<String>) -> Self {
        Self { scope, identity: identity.into() }
    }

    pub fn global() -> Self {
        Self::new(Scope::Global, GLOBAL_IDENTITY)
    }

    /// Store key of the counter for one fixed window.
    pub fn counter_key(&self, prefix: &str, window_index: u64) -> String {
        format!("{}/{}:{}:{}", prefix, self.scope, self.identity, window_index)
    }
}

/// Position of `now_ms` relative to the fixed windows of a quota.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowPosition {
    pub current: u64,
    pub previous: u64,
    pub window_ms: u64,
    pub elapsed_ms: u64,
}

impl WindowPosition {
    pub fn at(quota: Quota, now_ms: u64) -> Self {
        let window_ms = quota.window_ms();
        let current = now_ms / window_ms;
        Self {
            current,
            previous: current.saturating_sub(1),
            window_ms,
            elapsed_ms: now_ms % window_ms,
        }
    }

    /// Previous-window count scaled by the share of that window still inside the trailing window.
    pub fn weighted_previous(&self, previous_count: u64) -> u64 {
        let remaining = (self.window_ms - self.elapsed_ms) as u128;
        ((previous_count as u128 * remaining) / self.window_ms as u128) as u64
    }

    /// Counter TTL: long enough for the window to serve as "previous" for the next one.
    pub fn ttl_ms(&self) -> u64 {
        self.window_ms * 2 + 1000
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HitResult {
    pub success: bool,
    pub remaining: u64,
}

impl HitResult {
    pub fn denied() -> Self {
        Self { success: false, remaining: 0 }
    }
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically counts one request against `key`. Denied requests are not counted.
    async fn hit(
        &self,
        key: &RateLimitKey,
        quota: Quota,
        now_ms: u64
    ) -> Result<HitResult, RateLimitError>;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        burst_remaining: u64,
        daily_remaining: u64,
        global_remaining: u64,
    },
    /// Burst or daily quota exhausted for this client.
    ClientThrottled,
    /// Global quota exhausted.
    ServiceThrottled,
}

#[derive(Clone, Copy, Debug)]
pub struct Quotas {
    pub burst: Quota,
    pub daily: Quota,
    pub global: Quota,
}

impl Quotas {
    pub fn from_args(args: &Args) -> Self {
        Self {
            burst: Quota::new(args.burst_limit, Duration::from_secs(args.burst_window_secs)),
            daily: Quota::new(args.daily_limit, Duration::from_secs(args.daily_window_secs)),
            global: Quota::new(args.global_limit, Duration::from_secs(args.global_window_secs)),
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    quotas: Quotas,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, quotas: Quotas) -> Self {
        Self::with_clock(store, quotas, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CounterStore>, quotas: Quotas, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, quotas }
    }

    pub fn quotas(&self) -> Quotas {
        self.quotas
    }

    pub async fn check(&self, identity: &str) -> Result<RateLimitDecision, RateLimitError> {
        let now_ms = self.clock.now_ms();
        let burst_key = RateLimitKey::new(Scope::Burst, identity);
        let daily_key = RateLimitKey::new(Scope::Daily, identity);

        let (burst, daily) = tokio::join!(
            self.store.hit(&burst_key, self.quotas.burst, now_ms),
            self.store.hit(&daily_key, self.quotas.daily, now_ms)
        );
        let (burst, daily) = (burst?, daily?);

        if !burst.success || !daily.success {
            debug!(
                "Client {} throttled (burst ok: {}, daily ok: {})",
                identity,
                burst.success,
                daily.success
            );
            return Ok(RateLimitDecision::ClientThrottled);
        }

        let global = self.store.hit(&RateLimitKey::global(), self.quotas.global, now_ms).await?;
        if !global.success {
            warn!("Global chat quota exhausted; rejecting request from {}", identity);
            return Ok(RateLimitDecision::ServiceThrottled);
        }

        Ok(RateLimitDecision::Allowed {
            burst_remaining: burst.remaining,
            daily_remaining: daily.remaining,
            global_remaining: global.remaining,
        })
    }
}

pub async fn create_counter_store(
    args: &Args
) -> Result<Arc<dyn CounterStore>, Box<dyn Error + Send + Sync>> {
    match args.rate_limit_store.to_lowercase().as_str() {
        "redis" => {
            info!("Rate-limit counters stored in redis at {}", args.redis_url);
            let store = redis::RedisCounterStore::connect(
                &args.redis_url,
                args.rate_limit_prefix.clone()
            ).await?;
            Ok(Arc::new(store))
        }
        "memory" => {
            warn!("Rate-limit counters kept in process memory; limits are not shared across instances");
            Ok(Arc::new(memory::InMemoryCounterStore::new(args.rate_limit_prefix.clone())))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported rate limit store type: {}", args.rate_limit_store)
                    )
                )
            ),
    }
}
