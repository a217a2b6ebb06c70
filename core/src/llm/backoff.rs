use std::time::Duration;

/// Exponential delay between failovers, capped at `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverBackoff {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl FailoverBackoff {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Delay before the `failover`-th switch (0-based).
    pub fn delay(&self, failover: u32) -> Duration {
        let exp = 1u64 << failover.min(30);
        let delay = self.base_delay_ms.saturating_mul(exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let backoff = FailoverBackoff::new(100, 1000);
        assert_eq!(backoff.delay(0).as_millis(), 100);
        assert_eq!(backoff.delay(1).as_millis(), 200);
        assert_eq!(backoff.delay(3).as_millis(), 800);
        assert_eq!(backoff.delay(4).as_millis(), 1000);
        assert_eq!(backoff.delay(40).as_millis(), 1000);
    }

    #[test]
    fn test_none_never_sleeps() {
        assert_eq!(FailoverBackoff::none().delay(5), Duration::ZERO);
    }
}
