// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Retry policy with exponential backoff for remote calls.

use reqwest::StatusCode;
use std::time::Duration;

/// How often, and how patiently, a failed call is attempted again.
///
/// `max_attempts` counts the first attempt, so `1` disables retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
	pub retryable_statuses: Vec<StatusCode>,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
			retryable_statuses: vec![
				StatusCode::TOO_MANY_REQUESTS,
				StatusCode::REQUEST_TIMEOUT,
				StatusCode::INTERNAL_SERVER_ERROR,
				StatusCode::BAD_GATEWAY,
				StatusCode::SERVICE_UNAVAILABLE,
				StatusCode::GATEWAY_TIMEOUT,
			],
		}
	}
}

impl RetryConfig {
	/// Whether another attempt is allowed after `attempt` attempts have failed.
	pub fn allows_another(&self, attempt: u32) -> bool {
		attempt < self.max_attempts
	}

	/// Whether a reply with this status should be retried rather than judged.
	pub fn is_retryable_status(&self, status: StatusCode) -> bool {
		self.retryable_statuses.contains(&status)
	}

	/// Delay to wait before the attempt that follows `attempt` failures.
	///
	/// `attempt` is 1-based; the first retry waits roughly `base_delay`.
	/// A shrinking or non-finite factor never yields a negative delay.
	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1) as i32;
		let exponential_delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
		let capped_delay = exponential_delay.min(self.max_delay.as_secs_f64());

		let final_delay = if self.jitter {
			let jitter_factor = 0.5 + fastrand::f64();
			capped_delay * jitter_factor
		} else {
			capped_delay
		};

		Duration::try_from_secs_f64(final_delay.max(0.0)).unwrap_or(self.max_delay)
	}
}

/// Classifies errors as transient (worth retrying) or permanent.
pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}
