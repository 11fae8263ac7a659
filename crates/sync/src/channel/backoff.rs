// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect delay schedule.

use std::time::Duration;

/// Bounded exponential backoff: attempt `n` (1-based) waits `base × factor^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(2000), factor: 1.5 }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt`, or `None` once the attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let ms = self.base_delay.as_millis() as f64 * self.factor.powi(exp);
        Some(Duration::from_millis(ms.round() as u64))
    }

    /// Full schedule, one entry per permitted attempt.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).filter_map(|n| self.delay_for(n)).collect()
    }
}
