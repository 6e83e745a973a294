// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Configuration primitives for Courier.
//!
//! - [`Secret<T>`]: keeps the bearer credential out of logs and config dumps
//! - [`load_secret_env`]: reads secrets from `VAR` or `VAR_FILE`
//! - [`load_config`]: resolves a [`CourierConfig`] from defaults, a TOML
//!   file, the environment and CLI overrides

pub mod env;
pub mod error;
pub mod layer;
pub mod runtime;
pub mod secret;
pub mod sources;

pub use env::{load_secret_env, SecretEnvError};
pub use error::ConfigError;
pub use layer::ConfigLayer;
pub use runtime::{CourierConfig, LogFormat, LoggingConfig};
pub use secret::{Secret, SecretString, REDACTED};
pub use sources::{CliOverrides, ConfigSource, Precedence};

use std::path::PathBuf;

/// Resolve configuration from every source, lowest precedence first.
///
/// `config_file` replaces the default `$XDG_CONFIG_HOME/courier/config.toml`.
pub fn load_config(
	config_file: Option<PathBuf>,
	cli: CliOverrides,
) -> Result<CourierConfig, ConfigError> {
	let file = match config_file {
		Some(path) => sources::FileSource::new(path),
		None => sources::FileSource::user()?,
	};

	let mut sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(file),
		Box::new(sources::EnvSource),
		Box::new(sources::CliSource::new(cli)),
	];
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ConfigLayer::default();
	for source in &sources {
		tracing::debug!(source = source.name(), "merging config layer");
		merged = merged.merge(source.load()?);
	}

	CourierConfig::from_layer(merged)
}
