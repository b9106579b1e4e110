use xai_core::types::Timestamp;

/// Integer token bucket with one-second granularity. Refills `rate` tokens
/// per second up to `capacity`; a take that cannot be covered fails and
/// consumes nothing.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u64,
    tokens: u64,
    rate_per_sec: u64,
    last_refill: Timestamp,
}

impl TokenBucket {
    /// A bucket holding up to one second's worth of burst beyond the rate.
    pub fn new(rate_per_sec: u64, now: Timestamp) -> Self {
        let capacity = rate_per_sec.max(1) * 2;
        Self {
            capacity,
            tokens: capacity,
            rate_per_sec: rate_per_sec.max(1),
            last_refill: now,
        }
    }

    pub fn try_take(&mut self, amount: u64, now: Timestamp) -> bool {
        self.refill(now);
        if self.tokens < amount {
            return false;
        }
        self.tokens -= amount;
        true
    }

    fn refill(&mut self, now: Timestamp) {
        let elapsed = (now - self.last_refill).max(0) as u64;
        if elapsed > 0 {
            self.tokens = self
                .tokens
                .saturating_add(elapsed.saturating_mul(self.rate_per_sec))
                .min(self.capacity);
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let mut b = TokenBucket::new(5, 0);
        // Full burst: 10 tokens.
        for _ in 0..10 {
            assert!(b.try_take(1, 0));
        }
        assert!(!b.try_take(1, 0), "bucket exhausted");
    }

    #[test]
    fn refills_over_time() {
        let mut b = TokenBucket::new(5, 0);
        assert!(b.try_take(10, 0));
        assert!(!b.try_take(1, 0));
        assert!(b.try_take(5, 1), "one second refills the rate");
        assert!(!b.try_take(1, 1));
    }

    #[test]
    fn refill_caps_at_capacity() {
        let mut b = TokenBucket::new(5, 0);
        assert!(b.try_take(10, 0));
        // A long quiet period cannot bank more than the capacity.
        assert!(b.try_take(10, 1000));
        assert!(!b.try_take(1, 1000));
    }

    #[test]
    fn failed_take_consumes_nothing() {
        let mut b = TokenBucket::new(2, 0);
        assert!(!b.try_take(100, 0));
        assert!(b.try_take(4, 0), "tokens untouched by the failed take");
    }
}
