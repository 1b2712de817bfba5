//! Rate limiting implementation using token bucket algorithm.

use std::time::Instant;

/// Token bucket owned by a single connection task.
///
/// Refills continuously at `refill_per_second` up to `capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_second: f64,
    last_refill: Instant,
    blocked_count: u64,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(capacity: u32, refill_per_second: u32) -> Self {
        Self {
            capacity: f64::from(capacity),
            tokens: f64::from(capacity),
            refill_per_second: f64::from(refill_per_second),
            last_refill: Instant::now(),
            blocked_count: 0,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes one token if available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            self.blocked_count += 1;
            false
        }
    }

    /// Gets the total number of blocked requests
    pub fn blocked_count(&self) -> u64 {
        self.blocked_count
    }
}
