// Swarm Gate - Retry With Backoff
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Exponential backoff with +/-25% jitter for Docker calls. Only errors the
// caller marks as retryable are retried; everything else fails at once.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    pub const READ: Self = Self {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1000),
        backoff_factor: 2.0,
        jitter: true,
    };

    pub const WRITE: Self = Self {
        max_attempts: 2,
        base_delay: Duration::from_millis(200),
        max_delay: Duration::from_millis(1500),
        backoff_factor: 2.0,
        jitter: true,
    };

    /// Delay before attempt `attempt` (0-based; attempt 0 never waits).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.backoff_factor.powi(attempt as i32 - 1);
        let secs = (self.base_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let secs = if self.jitter {
            secs * rand::thread_rng().gen_range(0.75..1.25)
        } else {
            secs
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            log::debug!(
                "Retrying {} (attempt {}/{}) after {:.2}s",
                operation,
                attempt + 1,
                attempts,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }
        match call().await {
            Ok(value) => {
                if attempt > 0 {
                    log::info!("{} succeeded on attempt {}", operation, attempt + 1);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                log::warn!("{} failed on attempt {}: {}", operation, attempt + 1, e);
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    log::error!("{} failed after {} attempts: {}", operation, attempts, e);
                }
                return Err(e);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
