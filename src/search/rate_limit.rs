//! Per-query rate limiter / 查询限流
//!
//! Blocks re-executing the same normalized query within the cooldown. Records
//! never expire on their own; they only stop mattering once the cooldown has
//! passed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::utils::normalize_key;

/// Result of a rate-limit check / 限流检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitCheck {
    pub allowed: bool,
    pub remaining_ms: i64,
    pub error: Option<String>,
}

impl RateLimitCheck {
    fn allowed() -> Self {
        Self { allowed: true, remaining_ms: 0, error: None }
    }
}

/// Rate limiter / 限流器
pub struct RateLimiter {
    /// key -> last executed at (epoch ms) / 上次执行时间
    records: Mutex<HashMap<String, i64>>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
            config,
        }
    }

    /// Whether `query` may run now / 检查是否允许执行
    pub fn check(&self, query: &str) -> RateLimitCheck {
        let key = normalize_key(query);
        let Some(&last) = self.records.lock().get(&key) else {
            return RateLimitCheck::allowed();
        };
        let elapsed = self.clock.now_millis() - last;
        if elapsed >= self.config.cooldown_ms {
            return RateLimitCheck::allowed();
        }
        let remaining_ms = self.config.cooldown_ms - elapsed;
        // 向上取整到秒
        let seconds = (remaining_ms + 999) / 1000;
        RateLimitCheck {
            allowed: false,
            remaining_ms,
            error: Some(format!("Please wait {} seconds before repeating this search", seconds)),
        }
    }

    /// Mark `query` as executed now / 记录执行时间
    pub fn record(&self, query: &str) {
        let now = self.clock.now_millis();
        self.records.lock().insert(normalize_key(query), now);
    }

    /// Clear one key, or every key with `None` / 重置限流记录
    pub fn reset(&self, query: Option<&str>) {
        let mut records = self.records.lock();
        match query {
            Some(q) => {
                records.remove(&normalize_key(q));
            }
            None => records.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::new(clock, RateLimitConfig::default())
    }

    #[test]
    fn test_cooldown_blocks_same_query() {
        let clock = Arc::new(ManualClock::new(10_000));
        let limiter = limiter(clock.clone());
        assert!(limiter.check("dune").allowed);

        limiter.record("Dune");
        clock.advance(500);
        let check = limiter.check(" dune ");
        assert!(!check.allowed);
        assert_eq!(check.remaining_ms, 1_500);
        assert_eq!(check.error.as_deref(), Some("Please wait 2 seconds before repeating this search"));

        // 其他查询不受影响
        assert!(limiter.check("emma").allowed);

        clock.advance(1_500);
        assert!(limiter.check("dune").allowed);
    }

    #[test]
    fn test_reset() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(clock);
        limiter.record("a");
        limiter.record("b");
        limiter.reset(Some("A"));
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("b").allowed);
        limiter.reset(None);
        assert!(limiter.check("b").allowed);
    }
}
