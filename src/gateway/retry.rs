// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bounded exponential backoff.
//!
//! The delay sequence comes from [`backoff::ExponentialBackoff`] with jitter
//! disabled; [`RetrySchedule`] adds the attempt ceiling on top of its
//! elapsed-time cap.

use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};

/// Retry and polling schedule for gateway calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
    /// Wall-clock budget measured from the first attempt. `None` is unbounded.
    pub max_total_wait: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff: Duration::from_secs(2),
            multiplier: 2,
            max_backoff: Duration::from_secs(15),
            max_total_wait: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            multiplier: 1,
            max_backoff: Duration::ZERO,
            max_total_wait: None,
        }
    }

    /// Fresh backoff state; its clock starts now.
    pub fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            randomization_factor: 0.0,
            multiplier: f64::from(self.multiplier.max(1)),
            max_interval: self.max_backoff,
            max_elapsed_time: self.max_total_wait,
            ..ExponentialBackoff::default()
        };
        backoff.reset();
        backoff
    }

    /// Start a schedule for one operation.
    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            backoff: self.backoff(),
            retries_left: self.max_attempts.saturating_sub(1),
        }
    }
}

/// Delays between the attempts of one operation.
pub struct RetrySchedule {
    backoff: ExponentialBackoff,
    retries_left: u32,
}

impl RetrySchedule {
    /// Delay before the next attempt, or `None` once the attempt ceiling or
    /// the wall-clock budget is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries_left == 0 {
            return None;
        }
        self.retries_left -= 1;
        self.backoff.next_backoff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut schedule: RetrySchedule) -> Vec<Duration> {
        std::iter::from_fn(|| schedule.next_delay()).collect()
    }

    #[test]
    fn default_schedule_grows_then_caps() {
        let policy = RetryPolicy::default();
        let delays = drain(policy.schedule());

        assert_eq!(delays.len(), policy.max_attempts as usize - 1);
        assert_eq!(delays[0], Duration::from_secs(2));
        assert_eq!(delays[1], Duration::from_secs(4));
        assert_eq!(delays[2], Duration::from_secs(8));
        assert!(delays[3..].iter().all(|d| *d == policy.max_backoff));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            multiplier: 3,
            max_backoff: Duration::from_millis(500),
            max_total_wait: None,
        };
        let delays = drain(policy.schedule());
        assert_eq!(
            &delays[..4],
            &[
                Duration::from_millis(100),
                Duration::from_millis(300),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
        assert_eq!(delays.len(), 9);
    }

    #[test]
    fn delay_past_the_budget_ends_the_schedule() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(10),
            multiplier: 2,
            max_backoff: Duration::from_secs(30),
            max_total_wait: Some(Duration::from_secs(5)),
        };
        assert!(policy.schedule().next_delay().is_none());
    }

    #[test]
    fn immediate_policy_has_zero_delays() {
        assert_eq!(drain(RetryPolicy::immediate(4).schedule()), vec![Duration::ZERO; 3]);
        assert!(RetryPolicy::immediate(1).schedule().next_delay().is_none());
    }
}
