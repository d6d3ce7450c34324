//! Timing helpers for aggregate operations.

use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Measures one aggregate operation and logs its stages.
#[derive(Debug)]
pub struct Timer {
    start_time: Instant,
    operation_name: String,
    checkpoints: Vec<(String, Instant)>,
}

impl Timer {
    pub fn start(operation_name: impl Into<String>) -> Self {
        let operation_name = operation_name.into();
        debug!("Starting timer for: {}", operation_name);

        Self {
            start_time: Instant::now(),
            operation_name,
            checkpoints: Vec::new(),
        }
    }

    pub fn checkpoint(&mut self, checkpoint_name: &str) {
        let now = Instant::now();
        debug!(
            "{} - {}: {}ms",
            self.operation_name,
            checkpoint_name,
            now.duration_since(self.start_time).as_millis()
        );
        self.checkpoints.push((checkpoint_name.to_string(), now));
    }

    /// Log the total duration (and each stage) and warn when it exceeds `threshold_ms`.
    pub fn finish_with_threshold(self, threshold_ms: u64) -> Duration {
        let total_duration = self.start_time.elapsed();

        if self.checkpoints.is_empty() {
            info!(
                "{} completed in {}ms",
                self.operation_name,
                total_duration.as_millis()
            );
        } else {
            let mut last_time = self.start_time;
            let stages: Vec<String> = self
                .checkpoints
                .iter()
                .map(|(name, time)| {
                    let segment = time.duration_since(last_time);
                    last_time = *time;
                    format!("{}={}ms", name, segment.as_millis())
                })
                .collect();
            info!(
                "{} completed in {}ms ({})",
                self.operation_name,
                total_duration.as_millis(),
                stages.join(", ")
            );
        }

        if total_duration.as_millis() > threshold_ms as u128 {
            warn!(
                "{} took {}ms (exceeds threshold of {}ms)",
                self.operation_name,
                total_duration.as_millis(),
                threshold_ms
            );
        }

        total_duration
    }
}
