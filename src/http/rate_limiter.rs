//! Shared limiter for upstream HTTP calls: caps concurrency and spaces out request starts.

use crate::error::{AggregationError, Result};
use log::debug;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::sleep;

pub struct HttpRateLimiter {
    min_delay: Duration,
    semaphore: Semaphore,
    last_request: Mutex<Option<Instant>>,
}

impl HttpRateLimiter {
    pub fn new(max_concurrent: usize, min_delay: Duration) -> Self {
        Self {
            min_delay,
            semaphore: Semaphore::new(max_concurrent.max(1)),
            last_request: Mutex::new(None),
        }
    }

    /// Wait for a concurrency slot and for the minimum spacing since the
    /// previous request start. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| AggregationError::Transport(format!("rate limiter closed: {}", e)))?;

        if !self.min_delay.is_zero() {
            let mut last = self.last_request.lock().await;
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < self.min_delay {
                    let wait = self.min_delay - elapsed;
                    debug!("Rate limiter spacing request by {:?}", wait);
                    sleep(wait).await;
                }
            }
            *last = Some(Instant::now());
        }

        Ok(permit)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
