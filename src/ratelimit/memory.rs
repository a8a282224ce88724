use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ CounterStore, HitResult, Quota, RateLimitError, RateLimitKey, WindowPosition };

const PRUNE_THRESHOLD: usize = 10_000;

struct Counter {
    count: u64,
    expires_at_ms: u64,
}

/// Single-process counter store. Holds one lock across read, compare and increment.
pub struct InMemoryCounterStore {
    prefix: String,
    counters: Mutex<HashMap<String, Counter>>,
}

impl InMemoryCounterStore {
    pub fn new(prefix: String) -> Self {
        Self {
            prefix,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Current value of a raw counter key, ignoring expiry.
    pub fn count(&self, key: &str) -> u64 {
        self.counters
            .lock()
            .map(|map| map.get(key).map(|c| c.count).unwrap_or(0))
            .unwrap_or(0)
    }
}

fn live_count(map: &HashMap<String, Counter>, key: &str, now_ms: u64) -> u64 {
    match map.get(key) {
        Some(counter) if counter.expires_at_ms > now_ms => counter.count,
        _ => 0,
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn hit(
        &self,
        key: &RateLimitKey,
        quota: Quota,
        now_ms: u64
    ) -> Result<HitResult, RateLimitError> {
        let position = WindowPosition::at(quota, now_ms);
        let current_key = key.counter_key(&self.prefix, position.current);
        let previous_key = key.counter_key(&self.prefix, position.previous);

        let mut map = self.counters
            .lock()
            .map_err(|_| RateLimitError::Store("counter map lock poisoned".to_string()))?;

        if map.len() > PRUNE_THRESHOLD {
            map.retain(|_, counter| counter.expires_at_ms > now_ms);
        }

        let current = live_count(&map, &current_key, now_ms);
        let previous = if position.previous == position.current {
            0
        } else {
            live_count(&map, &previous_key, now_ms)
        };
        let weighted = position.weighted_previous(previous);

        if current + weighted >= quota.limit {
            return Ok(HitResult::denied());
        }

        let entry = map.entry(current_key).or_insert(Counter { count: 0, expires_at_ms: 0 });
        if entry.expires_at_ms <= now_ms {
            entry.count = 0;
            entry.expires_at_ms = now_ms + position.ttl_ms();
        }
        entry.count += 1;

        Ok(HitResult {
            success: true,
            remaining: quota.limit.saturating_sub(entry.count + weighted),
        })
    }
}
