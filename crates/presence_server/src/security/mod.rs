//! Security module for inbound frame limits and rate limiting.
//!
//! Limits are enforced per connection by the connection's own task. A frame
//! that breaks a limit is dropped; the connection stays open.

pub mod rate_limiter;

pub use rate_limiter::TokenBucket;

use serde::{Deserialize, Serialize};

/// Security configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Largest accepted inbound text frame, in bytes
    pub max_message_size: usize,
    /// Sustained inbound event rate per connection; 0 disables the limiter
    pub max_events_per_second: u32,
    /// Events a connection may send in a burst above the sustained rate
    pub burst: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024,
            max_events_per_second: 30,
            burst: 60,
        }
    }
}

/// Security-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("frame of {0} bytes exceeds the size limit")]
    MessageTooLarge(usize),
    #[error("event rate limit exceeded")]
    RateLimitExceeded,
}

/// Per-connection admission check for inbound frames.
#[derive(Debug)]
pub struct FrameGuard {
    max_message_size: usize,
    bucket: Option<TokenBucket>,
}

impl FrameGuard {
    pub fn new(config: &SecurityConfig) -> Self {
        let bucket = (config.max_events_per_second > 0).then(|| {
            TokenBucket::new(config.burst.max(1), config.max_events_per_second)
        });
        Self {
            max_message_size: config.max_message_size,
            bucket,
        }
    }

    /// Admits or rejects one inbound frame of `len` bytes.
    pub fn admit(&mut self, len: usize) -> Result<(), SecurityError> {
        if len > self.max_message_size {
            return Err(SecurityError::MessageTooLarge(len));
        }
        match self.bucket.as_mut() {
            Some(bucket) => {
                if bucket.try_acquire() {
                    Ok(())
                } else {
                    Err(SecurityError::RateLimitExceeded)
                }
            }
            None => Ok(()),
        }
    }

    pub fn blocked_count(&self) -> u64 {
        self.bucket.as_ref().map(TokenBucket::blocked_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_frames_are_rejected() {
        let mut guard = FrameGuard::new(&SecurityConfig {
            max_message_size: 10,
            max_events_per_second: 0,
            burst: 0,
        });
        assert_eq!(guard.admit(10), Ok(()));
        assert_eq!(guard.admit(11), Err(SecurityError::MessageTooLarge(11)));
    }

    #[test]
    fn bursts_beyond_the_bucket_are_rejected() {
        let mut guard = FrameGuard::new(&SecurityConfig {
            max_message_size: 1024,
            max_events_per_second: 1,
            burst: 3,
        });
        for _ in 0..3 {
            assert!(guard.admit(1).is_ok());
        }
        assert_eq!(guard.admit(1), Err(SecurityError::RateLimitExceeded));
        assert_eq!(guard.blocked_count(), 1);
    }
}
