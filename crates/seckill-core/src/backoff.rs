// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backoff controller for the acquisition loop.
//!
//! Delays are drawn uniformly from a configured `[min, max]` window. Rate
//! limited attempts draw from the upper half of the window and honour the
//! provider's Retry-After hint, still clamped to the window.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::trace;

use crate::classify::ErrorKind;
use crate::outcome::AttemptOutcome;

/// Default delay between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Smallest interval accepted from configuration.
pub const MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Error returned when an interval string cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid interval '{0}' (expected seconds like '60' or a range like '30-60')")]
pub struct ParseIntervalError(pub String);

/// Delay window between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_INTERVAL)
    }
}

impl BackoffConfig {
    /// Same delay every time.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min_delay: delay,
            max_delay: delay,
        }
    }

    /// Random delay within `[min, max]`. Bounds are swapped if reversed.
    pub fn range(min: Duration, max: Duration) -> Self {
        Self {
            min_delay: min.min(max),
            max_delay: min.max(max),
        }
    }

    /// Midpoint of the window.
    pub fn midpoint(&self) -> Duration {
        self.min_delay + (self.max_delay - self.min_delay) / 2
    }
}

impl fmt::Display for BackoffConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min_delay == self.max_delay {
            write!(f, "{}s", self.min_delay.as_secs())
        } else {
            write!(
                f,
                "{}-{}s",
                self.min_delay.as_secs(),
                self.max_delay.as_secs()
            )
        }
    }
}

impl FromStr for BackoffConfig {
    type Err = ParseIntervalError;

    /// Parses `"60"` or `"30-60"` (seconds). Values below 10 s are raised to 10 s.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIntervalError(s.to_string());
        let secs = |part: &str| -> Result<Duration, ParseIntervalError> {
            let value: u64 = part.trim().parse().map_err(|_| err())?;
            Ok(Duration::from_secs(value).max(MIN_INTERVAL))
        };

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(err());
        }
        match trimmed.split_once('-') {
            Some((min, max)) => Ok(Self::range(secs(min)?, secs(max)?)),
            None => Ok(Self::fixed(secs(trimmed)?)),
        }
    }
}

/// Computes the wait before the next attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before the attempt following `previous`, or `None` when the loop
    /// must stop. `attempt_index` is the 1-based number of the attempt that
    /// produced `previous`.
    pub fn next_delay(&self, previous: &AttemptOutcome, attempt_index: u32) -> Option<Duration> {
        let AttemptOutcome::Retryable { kind, error } = previous else {
            return None;
        };

        let BackoffConfig {
            min_delay,
            max_delay,
        } = self.config;

        let delay = if *kind == ErrorKind::RateLimit {
            let drawn = sample(self.config.midpoint(), max_delay);
            let hinted = error.retry_after().map_or(drawn, |hint| drawn.max(hint));
            hinted.clamp(min_delay, max_delay)
        } else {
            sample(min_delay, max_delay)
        };

        trace!(
            attempt = attempt_index,
            kind = %kind,
            delay_ms = delay.as_millis() as u64,
            "Computed backoff delay"
        );
        Some(delay)
    }
}

/// Uniform draw in `[lo, hi]` at millisecond resolution.
fn sample(lo: Duration, hi: Duration) -> Duration {
    let lo_ms = lo.as_millis() as u64;
    let hi_ms = hi.as_millis() as u64;
    if lo_ms >= hi_ms {
        return lo;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo_ms..=hi_ms))
}
