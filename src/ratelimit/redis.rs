use async_trait::async_trait;
use log::info;
use redis::aio::MultiplexedConnection;
use redis::{ Client, Script };

use super::{ CounterStore, HitResult, Quota, RateLimitError, RateLimitKey, WindowPosition };

// Read both windows, compare, then increment; one EVAL so concurrent hits serialize in redis.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local current_key = KEYS[1]
local previous_key = KEYS[2]
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local elapsed_ms = tonumber(ARGV[3])
local ttl_ms = tonumber(ARGV[4])

local current = tonumber(redis.call("GET", current_key) or "0")
local previous = tonumber(redis.call("GET", previous_key) or "0")
local weighted = math.floor(previous * (window_ms - elapsed_ms) / window_ms)

if current + weighted >= limit then
  return -1
end

local updated = redis.call("INCR", current_key)
if updated == 1 then
  redis.call("PEXPIRE", current_key, ttl_ms)
end
return limit - (updated + weighted)
"#;

pub struct RedisCounterStore {
    conn: MultiplexedConnection,
    prefix: String,
    script: Script,
}

impl RedisCounterStore {
    pub async fn connect(url: &str, prefix: String) -> Result<Self, RateLimitError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to rate-limit store at {}", url);
        Ok(Self {
            conn,
            prefix,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(
        &self,
        key: &RateLimitKey,
        quota: Quota,
        now_ms: u64
    ) -> Result<HitResult, RateLimitError> {
        let position = WindowPosition::at(quota, now_ms);
        let mut conn = self.conn.clone();

        let remaining: i64 = self.script
            .key(key.counter_key(&self.prefix, position.current))
            .key(key.counter_key(&self.prefix, position.previous))
            .arg(quota.limit)
            .arg(position.window_ms)
            .arg(position.elapsed_ms)
            .arg(position.ttl_ms())
            .invoke_async(&mut conn).await?;

        Ok(script_result(remaining))
    }
}

fn script_result(raw: i64) -> HitResult {
    if raw < 0 {
        HitResult::denied()
    } else {
        HitResult { success: true, remaining: raw as u64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Scope;

    #[test]
    fn negative_script_result_means_denied() {
        assert_eq!(script_result(-1), HitResult::denied());
        assert_eq!(script_result(0), HitResult { success: true, remaining: 0 });
        assert_eq!(script_result(4), HitResult { success: true, remaining: 4 });
    }

    #[tokio::test]
    async fn connect_fails_for_invalid_url() {
        assert!(RedisCounterStore::connect("not-a-redis-url", "p".into()).await.is_err());
    }

    // The tests below need a live server: `REDIS_URL=redis://... cargo test -- --ignored`.

    const MINUTE_MS: u64 = 60_000;
    const START: u64 = 19_000 * 86_400_000;

    async fn live_store() -> RedisCounterStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let prefix = format!("ask-ai-test-{}", uuid::Uuid::new_v4().simple());
        RedisCounterStore::connect(&url, prefix).await.expect("redis reachable")
    }

    async fn raw_count(store: &RedisCounterStore, key: &str) -> Option<u64> {
        let mut conn = store.conn.clone();
        redis::cmd("GET").arg(key).query_async(&mut conn).await.unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn script_denies_without_counting_and_sets_ttl() {
        let store = live_store().await;
        let key = RateLimitKey::new(Scope::Burst, "10.0.0.1");
        let quota = Quota::new(3, std::time::Duration::from_millis(MINUTE_MS));

        for expected in [2, 1, 0] {
            let hit = store.hit(&key, quota, START).await.unwrap();
            assert_eq!(hit, HitResult { success: true, remaining: expected });
        }
        for _ in 0..5 {
            assert_eq!(store.hit(&key, quota, START).await.unwrap(), HitResult::denied());
        }

        let current = key.counter_key(&store.prefix, WindowPosition::at(quota, START).current);
        assert_eq!(raw_count(&store, &current).await, Some(3));

        let mut conn = store.conn.clone();
        let ttl: i64 = redis::cmd("PTTL").arg(&current).query_async(&mut conn).await.unwrap();
        assert!(ttl > 0 && ttl <= (MINUTE_MS * 2 + 1000) as i64);

        // Half a window later, half of the previous window still weighs in.
        let later = START + MINUTE_MS + MINUTE_MS / 2;
        for expected in [1, 0] {
            let hit = store.hit(&key, quota, later).await.unwrap();
            assert_eq!(hit, HitResult { success: true, remaining: expected });
        }
        assert_eq!(store.hit(&key, quota, later).await.unwrap(), HitResult::denied());
    }

    #[tokio::test]
    #[ignore]
    async fn concurrent_hits_never_exceed_the_limit() {
        let store = std::sync::Arc::new(live_store().await);
        let key = RateLimitKey::new(Scope::Daily, "same-ip");
        let quota = Quota::new(5, std::time::Duration::from_millis(MINUTE_MS));

        let handles: Vec<_> = (0..40)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move { store.hit(&key, quota, START).await.unwrap() })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().success {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);

        let current = key.counter_key(&store.prefix, WindowPosition::at(quota, START).current);
        assert_eq!(raw_count(&store, &current).await, Some(5));
    }
}
