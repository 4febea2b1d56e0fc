//! Time source / 时间源
//!
//! Cache expiry and rate limiting read wall-clock time through this trait so
//! tests can move time forward explicitly. / 缓存与限流通过此 trait 读取时间

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Clock abstraction (epoch milliseconds) / 时钟抽象（毫秒时间戳）
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;

    /// Current time as a UTC datetime / 当前 UTC 时间
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_millis())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// System wall clock / 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock (tests, replays) / 手动时钟
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self { now: AtomicI64::new(start_millis) }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1_000);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.set(10);
        assert_eq!(clock.now().timestamp_millis(), 10);
    }
}
