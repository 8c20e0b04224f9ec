// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reconnect policy with bounded exponential backoff.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::ResolverConfig;

/// Upper bound of the upward jitter, as a fraction of the delay.
const JITTER_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
	/// Consecutive failed reconnects tolerated before giving up.
	pub max_event_stream_retries: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_event_stream_retries: 5,
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(120),
			backoff_factor: 2.0,
			jitter: true,
		}
	}
}

impl RetryPolicy {
	pub fn from_config(config: &ResolverConfig) -> Self {
		Self {
			max_event_stream_retries: config.max_event_stream_retries,
			base_delay: config.retry_backoff,
			max_delay: config.retry_backoff_max,
			..Self::default()
		}
	}

	/// Undithered delay before reconnect number `reconnect` (1-based).
	fn base_delay_for(&self, reconnect: u32) -> Duration {
		if reconnect <= 1 {
			return Duration::ZERO;
		}
		let exponent = (reconnect - 2).min(i32::MAX as u32) as i32;
		let exponential =
			self.base_delay.as_secs_f64() * self.backoff_factor.max(1.0).powi(exponent);
		let capped = exponential.min(self.max_delay.as_secs_f64());
		Duration::from_secs_f64(capped)
	}
}

/// Tracks consecutive failures for one sync driver.
///
/// Reconnect 1 is immediate. Reconnect n waits
/// `min(base * factor^(n-2), max)`, jittered upward when enabled and clamped
/// to `max`. Delays never decrease between resets.
#[derive(Debug)]
pub struct BackoffLoop {
	policy: RetryPolicy,
	failures: u32,
	last_delay: Duration,
}

impl BackoffLoop {
	pub fn new(policy: RetryPolicy) -> Self {
		Self {
			policy,
			failures: 0,
			last_delay: Duration::ZERO,
		}
	}

	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Consecutive failures since the last reset.
	pub fn failures(&self) -> u32 {
		self.failures
	}

	/// Records a failure and returns the wait before the next reconnect, or
	/// `None` once the retry budget is exhausted.
	pub fn next_delay(&mut self) -> Option<Duration> {
		self.failures = self.failures.saturating_add(1);
		if self.failures > self.policy.max_event_stream_retries {
			return None;
		}

		let mut delay = self.policy.base_delay_for(self.failures);
		if self.policy.jitter && !delay.is_zero() {
			delay = delay.mul_f64(1.0 + fastrand::f64() * JITTER_FRACTION);
		}
		delay = delay.min(self.policy.max_delay).max(self.last_delay);
		self.last_delay = delay;
		Some(delay)
	}

	/// Called when a session delivered a message.
	pub fn reset(&mut self) {
		self.failures = 0;
		self.last_delay = Duration::ZERO;
	}

	/// Sleeps for `delay` unless cancelled first. Returns false on cancellation.
	pub async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> bool {
		if delay.is_zero() {
			return !cancel.is_cancelled();
		}
		warn!(
			delay_ms = delay.as_millis() as u64,
			attempt = self.failures,
			max_attempts = self.policy.max_event_stream_retries,
			"Reconnecting to flag source"
		);
		tokio::select! {
			biased;
			_ = cancel.cancelled() => false,
			_ = tokio::time::sleep(delay) => true,
		}
	}
}
