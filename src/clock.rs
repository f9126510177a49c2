//! Wall clock adjustable from the API
//!
//! The device has no battery-backed RTC worth trusting, so clients push the
//! current time. The host clock is kept as the base and only an offset is
//! stored.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Default)]
pub struct Clock {
    offset_ms: AtomicI64,
}

fn system_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in epoch milliseconds
    pub fn now_ms(&self) -> i64 {
        system_ms() + self.offset_ms.load(Ordering::Relaxed)
    }

    /// Current time in whole epoch seconds, clamped at 0
    pub fn now_secs(&self) -> u64 {
        (self.now_ms().max(0) / 1000) as u64
    }

    /// Set the clock to `epoch_ms`
    pub fn set_ms(&self, epoch_ms: i64) {
        let offset = epoch_ms - system_ms();
        self.offset_ms.store(offset, Ordering::Relaxed);
        tracing::info!("Clock set to {} ms (offset {} ms)", epoch_ms, offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_moves_clock() {
        let clock = Clock::new();
        clock.set_ms(1_000_000);
        let now = clock.now_ms();
        assert!((1_000_000..1_060_000).contains(&now));
        assert_eq!(clock.now_secs(), (now / 1000) as u64);
    }

    #[test]
    fn test_negative_time_clamps_seconds() {
        let clock = Clock::new();
        clock.set_ms(-10_000_000);
        assert_eq!(clock.now_secs(), 0);
    }
}
