// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolved runtime configuration.

use std::time::Duration;

use courier_common_http::RetryConfig;
use url::Url;

use crate::layer::{ConfigLayer, RetryLayer};
use crate::secret::SecretString;
use crate::ConfigError;

pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
	Compact,
}

impl std::str::FromStr for LogFormat {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"pretty" => Ok(Self::Pretty),
			"json" => Ok(Self::Json),
			"compact" => Ok(Self::Compact),
			other => Err(ConfigError::invalid_value(
				"logging.format",
				format!("unknown format '{other}'"),
			)),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
	/// An `EnvFilter` directive, e.g. `info` or `courier_jobs=debug`.
	pub level: String,
	pub format: LogFormat,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
			format: LogFormat::default(),
		}
	}
}

/// Everything needed to open a connection and run call jobs.
#[derive(Debug, Clone)]
pub struct CourierConfig {
	pub base_url: Url,
	pub access_token: Option<SecretString>,
	pub job_timeout: Duration,
	/// `None` disables retries.
	pub retry: Option<RetryConfig>,
	pub logging: LoggingConfig,
}

impl CourierConfig {
	pub fn from_layer(layer: ConfigLayer) -> Result<Self, ConfigError> {
		let connection = layer.connection.unwrap_or_default();

		let raw_url = connection
			.base_url
			.ok_or_else(|| ConfigError::missing_field("connection.base_url"))?;
		let base_url = Url::parse(&raw_url)
			.map_err(|e| ConfigError::invalid_value("connection.base_url", e.to_string()))?;
		if !matches!(base_url.scheme(), "http" | "https") {
			return Err(ConfigError::invalid_value(
				"connection.base_url",
				"scheme must be http or https",
			));
		}

		let job_timeout = match layer.jobs.and_then(|j| j.timeout_secs) {
			Some(0) => {
				return Err(ConfigError::invalid_value(
					"jobs.timeout_secs",
					"must be greater than zero",
				))
			}
			Some(secs) => Duration::from_secs(secs),
			None => DEFAULT_JOB_TIMEOUT,
		};

		let logging = match layer.logging {
			Some(l) => LoggingConfig {
				level: l.level.unwrap_or_else(|| LoggingConfig::default().level),
				format: l.format.as_deref().map(str::parse).transpose()?.unwrap_or_default(),
			},
			None => LoggingConfig::default(),
		};

		Ok(Self {
			base_url,
			access_token: connection.access_token,
			job_timeout,
			retry: layer.retry.map(retry_from_layer).transpose()?.flatten(),
			logging,
		})
	}
}

fn retry_from_layer(layer: RetryLayer) -> Result<Option<RetryConfig>, ConfigError> {
	let defaults = RetryConfig::default();
	let Some(max_attempts) = layer.max_attempts.filter(|n| *n > 1) else {
		return Ok(None);
	};

	let backoff_factor = layer.backoff_factor.unwrap_or(defaults.backoff_factor);
	if !backoff_factor.is_finite() || backoff_factor < 1.0 {
		return Err(ConfigError::invalid_value(
			"retry.backoff_factor",
			format!("must be a finite number of at least 1.0, got {backoff_factor}"),
		));
	}

	Ok(Some(RetryConfig {
		max_attempts,
		base_delay: layer
			.base_delay_ms
			.map(Duration::from_millis)
			.unwrap_or(defaults.base_delay),
		max_delay: layer
			.max_delay_ms
			.map(Duration::from_millis)
			.unwrap_or(defaults.max_delay),
		backoff_factor,
		jitter: layer.jitter.unwrap_or(defaults.jitter),
		retryable_statuses: defaults.retryable_statuses,
	}))
}
