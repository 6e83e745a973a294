// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: file, environment, CLI.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::env::load_secret_env;
use crate::layer::*;
use crate::ConfigError;

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	File = 30,
	Environment = 50,
	Cli = 60,
}

pub trait ConfigSource: Send + Sync {
	/// Name for logging
	fn name(&self) -> &'static str;

	fn precedence(&self) -> Precedence;

	fn load(&self) -> Result<ConfigLayer, ConfigError>;
}

/// TOML configuration file. A missing file yields an empty layer.
pub struct FileSource {
	path: PathBuf,
}

impl FileSource {
	pub fn new(path: PathBuf) -> Self {
		Self { path }
	}

	/// User config: `$XDG_CONFIG_HOME/courier/config.toml`
	pub fn user() -> Result<Self, ConfigError> {
		let dir = dirs::config_dir().ok_or(ConfigError::ConfigDirNotFound)?;
		Ok(Self::new(dir.join("courier").join("config.toml")))
	}
}

impl ConfigSource for FileSource {
	fn name(&self) -> &'static str {
		"file"
	}

	fn precedence(&self) -> Precedence {
		Precedence::File
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path)?;
		toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})
	}
}

/// Environment variables with the `COURIER_` prefix.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading environment variables");
		let mut layer = ConfigLayer::default();

		if let Some(token) = load_secret_env("COURIER_ACCESS_TOKEN")? {
			trace!("loaded access token from environment");
			connection(&mut layer).access_token = Some(token);
		}

		for (key, value) in std::env::vars() {
			if !key.starts_with("COURIER_") {
				continue;
			}

			let value = value.trim().to_string();
			if value.is_empty() {
				continue;
			}

			trace!(key = %key, "processing env var");

			match key.as_str() {
				"COURIER_BASE_URL" => connection(&mut layer).base_url = Some(value),
				"COURIER_JOB_TIMEOUT_SECS" => {
					let secs = value
						.parse()
						.map_err(|_| ConfigError::invalid_value(key.as_str(), "expected whole seconds"))?;
					layer.jobs.get_or_insert_with(JobsLayer::default).timeout_secs = Some(secs);
				}
				"COURIER_RETRY_MAX_ATTEMPTS" => {
					let attempts = value
						.parse()
						.map_err(|_| ConfigError::invalid_value(key.as_str(), "expected a count"))?;
					layer.retry.get_or_insert_with(RetryLayer::default).max_attempts = Some(attempts);
				}
				"COURIER_LOG_LEVEL" => {
					layer.logging.get_or_insert_with(LoggingLayer::default).level = Some(value);
				}
				"COURIER_LOG_FORMAT" => {
					layer.logging.get_or_insert_with(LoggingLayer::default).format = Some(value);
				}
				_ => {}
			}
		}

		Ok(layer)
	}
}

fn connection(layer: &mut ConfigLayer) -> &mut ConnectionLayer {
	layer
		.connection
		.get_or_insert_with(ConnectionLayer::default)
}

/// Values given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
	pub base_url: Option<String>,
	pub timeout_secs: Option<u64>,
	pub log_level: Option<String>,
	pub log_format: Option<String>,
}

pub struct CliSource {
	overrides: CliOverrides,
}

impl CliSource {
	pub fn new(overrides: CliOverrides) -> Self {
		Self { overrides }
	}
}

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"cli"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Cli
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		let mut layer = ConfigLayer::default();
		let cli = self.overrides.clone();

		if let Some(url) = cli.base_url {
			connection(&mut layer).base_url = Some(url);
		}
		if let Some(secs) = cli.timeout_secs {
			layer.jobs = Some(JobsLayer {
				timeout_secs: Some(secs),
			});
		}
		if cli.log_level.is_some() || cli.log_format.is_some() {
			layer.logging = Some(LoggingLayer {
				level: cli.log_level,
				format: cli.log_format,
			});
		}

		Ok(layer)
	}
}
