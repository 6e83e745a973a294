// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::secret::SecretString;

/// Partial configuration - all fields are Option so layers can be merged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigLayer {
	#[serde(default)]
	pub connection: Option<ConnectionLayer>,
	#[serde(default)]
	pub jobs: Option<JobsLayer>,
	#[serde(default)]
	pub retry: Option<RetryLayer>,
	#[serde(default)]
	pub logging: Option<LoggingLayer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionLayer {
	#[serde(default)]
	pub base_url: Option<String>,
	#[serde(default)]
	pub access_token: Option<SecretString>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobsLayer {
	#[serde(default)]
	pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryLayer {
	#[serde(default)]
	pub max_attempts: Option<u32>,
	#[serde(default)]
	pub base_delay_ms: Option<u64>,
	#[serde(default)]
	pub max_delay_ms: Option<u64>,
	#[serde(default)]
	pub backoff_factor: Option<f64>,
	#[serde(default)]
	pub jitter: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingLayer {
	#[serde(default)]
	pub level: Option<String>,
	#[serde(default)]
	pub format: Option<String>,
}

impl ConfigLayer {
	/// Overlay `other` on top of `self`; values set in `other` win.
	pub fn merge(self, other: ConfigLayer) -> ConfigLayer {
		ConfigLayer {
			connection: merge_section(self.connection, other.connection, |base, top| {
				ConnectionLayer {
					base_url: top.base_url.or(base.base_url),
					access_token: top.access_token.or(base.access_token),
				}
			}),
			jobs: merge_section(self.jobs, other.jobs, |base, top| JobsLayer {
				timeout_secs: top.timeout_secs.or(base.timeout_secs),
			}),
			retry: merge_section(self.retry, other.retry, |base, top| RetryLayer {
				max_attempts: top.max_attempts.or(base.max_attempts),
				base_delay_ms: top.base_delay_ms.or(base.base_delay_ms),
				max_delay_ms: top.max_delay_ms.or(base.max_delay_ms),
				backoff_factor: top.backoff_factor.or(base.backoff_factor),
				jitter: top.jitter.or(base.jitter),
			}),
			logging: merge_section(self.logging, other.logging, |base, top| LoggingLayer {
				level: top.level.or(base.level),
				format: top.format.or(base.format),
			}),
		}
	}
}

fn merge_section<T>(base: Option<T>, top: Option<T>, f: impl FnOnce(T, T) -> T) -> Option<T> {
	match (base, top) {
		(Some(base), Some(top)) => Some(f(base, top)),
		(base, top) => top.or(base),
	}
}
