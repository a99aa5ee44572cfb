//! Signaling reconnection schedule
//!
//! The relay client owns automatic reconnection. The default schedule mirrors
//! the SignalR client's built-in retry delays: 0 s, 2 s, 10 s, 30 s, then
//! give up.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed list of delays between reconnection attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before each attempt in milliseconds; its length is the retry budget
    pub schedule_ms: Vec<u64>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            schedule_ms: vec![0, 2_000, 10_000, 30_000],
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect
    pub fn disabled() -> Self {
        Self {
            schedule_ms: Vec::new(),
        }
    }

    /// Build a schedule with exponential backoff
    ///
    /// # Arguments
    /// * `max_retries` - Number of attempts before giving up
    /// * `initial_ms` - Delay before the first attempt
    /// * `max_ms` - Upper bound for any single delay
    /// * `multiplier` - Growth factor between attempts
    pub fn exponential(max_retries: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> Self {
        let schedule_ms = (0..max_retries)
            .map(|attempt| {
                let backoff_ms = (initial_ms as f64) * multiplier.powi(attempt as i32);
                backoff_ms.min(max_ms as f64) as u64
            })
            .collect();
        Self { schedule_ms }
    }

    /// Delay before the given attempt (0-indexed), or `None` once exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        self.schedule_ms
            .get(attempt as usize)
            .map(|ms| Duration::from_millis(*ms))
    }

    /// Check if more retries are allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        (attempt as usize) < self.schedule_ms.len()
    }
}
