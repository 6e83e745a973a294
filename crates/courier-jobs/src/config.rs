// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use courier_common_config::runtime::DEFAULT_JOB_TIMEOUT;
use courier_common_config::CourierConfig;
use courier_common_http::RetryConfig;

/// Per-job execution settings.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
	/// Maximum wait for a reply, measured per attempt from submission.
	pub timeout: Duration,
	/// `None` means a single attempt.
	pub retry: Option<RetryConfig>,
}

impl Default for JobConfig {
	fn default() -> Self {
		Self {
			timeout: DEFAULT_JOB_TIMEOUT,
			retry: None,
		}
	}
}

impl JobConfig {
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_retry(mut self, retry: RetryConfig) -> Self {
		self.retry = Some(retry);
		self
	}
}

impl From<&CourierConfig> for JobConfig {
	fn from(config: &CourierConfig) -> Self {
		Self {
			timeout: config.job_timeout,
			retry: config.retry.clone(),
		}
	}
}
