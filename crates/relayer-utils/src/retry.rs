// Copyright (C) 2022-2024 Webb Technologies Inc.
//
// Tangle is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Tangle is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should receive a copy of the GNU General Public License
// If not, see <http://www.gnu.org/licenses/>.

//! Retry logic for async calls and for scheduling failed dispatches.

use std::time::Duration;

use backoff::backoff::Backoff;
use rand::Rng;

/// Constant with Max Retry Count is a backoff policy which always returns
/// a constant duration, until it exceeds the maximum retry count.
///
/// Used for short local retries, like a store write during ingest.
#[derive(Debug)]
pub struct ConstantWithMaxRetryCount {
    interval: Duration,
    max_retry_count: usize,
    count: usize,
}

impl ConstantWithMaxRetryCount {
    /// Creates a new Constant backoff that waits `interval` between retries
    /// and gives up (returns `None`) after `max_retry_count` retries.
    pub fn new(interval: Duration, max_retry_count: usize) -> Self {
        Self {
            interval,
            max_retry_count,
            count: 0,
        }
    }
}

impl Backoff for ConstantWithMaxRetryCount {
    fn next_backoff(&mut self) -> Option<Duration> {
        (self.count < self.max_retry_count).then(|| {
            self.count += 1;
            self.interval
        })
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Exponential schedule for re-dispatching a message after a retryable failure.
///
/// Unlike [`backoff::ExponentialBackoff`] this is stateless: the delay is a
/// pure function of the attempt count, which is what the store persists, so
/// the schedule survives a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Delay after the first failed attempt.
    pub base: Duration,
    /// Multiplier applied per additional attempt.
    pub factor: u32,
    /// Upper bound on any single delay, jitter included.
    pub max_interval: Duration,
    /// Upper bound of the uniformly random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            factor: 2,
            max_interval: Duration::from_secs(60),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetrySchedule {
    /// Delay before the next attempt, given how many attempts were already made.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.delay_with_jitter(attempts, jitter)
    }

    /// Same as [`RetrySchedule::delay_for`] but with a caller supplied jitter.
    pub fn delay_with_jitter(&self, attempts: u32, jitter: Duration) -> Duration {
        let exp = attempts.saturating_sub(1);
        let multiplier = self.factor.max(1).checked_pow(exp).unwrap_or(u32::MAX);
        let delay = self
            .base
            .checked_mul(multiplier)
            .unwrap_or(self.max_interval)
            .saturating_add(jitter.min(self.max_jitter));
        delay.min(self.max_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_stops_after_max_retries() {
        let mut b = ConstantWithMaxRetryCount::new(Duration::from_millis(5), 2);
        assert_eq!(b.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(b.next_backoff(), Some(Duration::from_millis(5)));
        assert_eq!(b.next_backoff(), None);
        b.reset();
        assert!(b.next_backoff().is_some());
    }

    #[test]
    fn schedule_grows_exponentially_until_cap() {
        let schedule = RetrySchedule {
            max_jitter: Duration::ZERO,
            ..Default::default()
        };
        let delays: Vec<_> = (1..=7)
            .map(|n| schedule.delay_with_jitter(n, Duration::ZERO).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn schedule_is_non_decreasing_with_jitter() {
        let schedule = RetrySchedule::default();
        let mut last = Duration::ZERO;
        for attempts in 1..=64 {
            // worst case: maximum jitter first, none afterwards.
            let high = schedule.delay_with_jitter(attempts, schedule.max_jitter);
            let low = schedule.delay_with_jitter(attempts + 1, Duration::ZERO);
            assert!(low >= high, "attempt {attempts}: {low:?} < {high:?}");
            let sampled = schedule.delay_for(attempts);
            assert!(sampled <= schedule.max_interval);
            assert!(sampled >= last || sampled == schedule.max_interval);
            last = schedule.delay_with_jitter(attempts, Duration::ZERO);
        }
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let schedule = RetrySchedule {
            base: Duration::from_secs(59),
            factor: 1,
            max_interval: Duration::from_secs(60),
            max_jitter: Duration::from_secs(5),
        };
        assert_eq!(
            schedule.delay_with_jitter(1, Duration::from_secs(5)),
            Duration::from_secs(60)
        );
    }
}
