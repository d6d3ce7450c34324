use log::{debug, error, info, warn};
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    /// Upstream search or lookup returned no results
    #[error("Not Found: {0}")]
    NotFound(String),

    /// Network/connectivity issues, timeouts
    #[error("Transport Error: {0}")]
    Transport(String),

    /// Non-2xx response (other than 404 and 429)
    #[error("Upstream Error: HTTP {status}: {detail}")]
    Upstream { status: u16, detail: String },

    /// HTTP 429 or an upstream quota message
    #[error("Rate Limited: {0}")]
    RateLimited(String),

    /// Response body did not match the expected schema
    #[error("Malformed Response: {0}")]
    Malformed(String),

    /// Attribute cannot be produced for this kind of identifier
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Invalid Input: {0}")]
    InvalidInput(String),

    /// Token exchange with an OAuth-protected upstream failed
    #[error("Auth Error: {0}")]
    Auth(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for AggregationError {
    fn from(err: serde_json::Error) -> Self {
        AggregationError::Malformed(format!("JSON deserialization error: {}", err))
    }
}

impl From<reqwest::Error> for AggregationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AggregationError::Transport(format!("request timed out: {}", err))
        } else {
            AggregationError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for AggregationError {
    fn from(err: url::ParseError) -> Self {
        AggregationError::Config(format!("invalid endpoint URL: {}", err))
    }
}

impl AggregationError {
    /// Errors that may succeed if the same request is issued again
    pub fn is_recoverable(&self) -> bool {
        match self {
            AggregationError::Transport(_) => true,
            AggregationError::RateLimited(_) => true,
            AggregationError::Upstream { status, .. } => *status >= 500 || *status == 408,
            AggregationError::NotFound(_) => false,
            AggregationError::Malformed(_) => false,
            AggregationError::Unsupported(_) => false,
            AggregationError::InvalidInput(_) => false,
            AggregationError::Auth(_) => false,
            AggregationError::Config(_) => false,
            AggregationError::Cancelled => false,
        }
    }

    /// Errors that will never change within a session. The cache keeps these
    /// for the process lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AggregationError::NotFound(_)
                | AggregationError::Unsupported(_)
                | AggregationError::InvalidInput(_)
        )
    }

    pub fn should_retry(&self) -> bool {
        self.is_recoverable()
    }

    pub fn categorize(&self) -> ErrorCategory {
        match self {
            AggregationError::NotFound(_) => ErrorCategory::Resolution,
            AggregationError::Transport(_)
            | AggregationError::Upstream { .. }
            | AggregationError::RateLimited(_) => ErrorCategory::Network,
            AggregationError::Malformed(_) => ErrorCategory::Data,
            AggregationError::Unsupported(_) | AggregationError::InvalidInput(_) => {
                ErrorCategory::Request
            }
            AggregationError::Auth(_) | AggregationError::Config(_) => {
                ErrorCategory::Configuration
            }
            AggregationError::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Resolution,
    Network,
    Data,
    Request,
    Configuration,
    Cancelled,
}

/// Retry policy with exponential backoff and jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 - 1.0, fraction of the delay randomized in either direction
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: 0.1,
        }
    }

    /// Delay before the given attempt (attempt 0 runs immediately).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(16);
        let delay_ms = self.base_delay.as_millis() * 2_u128.pow(exponent);
        let capped = delay_ms.min(self.max_delay.as_millis()) as u64;

        let delay = if self.jitter > 0.0 && capped > 0 {
            let spread = (capped as f64 * self.jitter) as i64;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            Duration::from_millis((capped as i64 + offset).max(0) as u64)
        } else {
            Duration::from_millis(capped)
        };

        debug!("Retry attempt {}: delay = {:?}", attempt, delay);
        delay
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    pub async fn execute<F, T, E, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
        E: Into<AggregationError>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                sleep(self.delay_for_attempt(attempt)).await;
            }

            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("{} succeeded after {} retries", label, attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    let err: AggregationError = e.into();

                    if !err.should_retry() {
                        debug!("{}: non-retryable error on attempt {}: {}", label, attempt + 1, err);
                        return Err(err);
                    }

                    warn!("{}: attempt {} failed: {} (retrying...)", label, attempt + 1, err);
                    last_error = Some(err);
                }
            }
        }

        error!("{}: all {} attempts failed", label, self.max_attempts);
        Err(last_error
            .unwrap_or_else(|| AggregationError::Transport("retry budget exhausted".to_string())))
    }
}

pub type Result<T> = std::result::Result<T, AggregationError>;
