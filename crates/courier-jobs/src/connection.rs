// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use courier_common_config::{CourierConfig, SecretString};
use parking_lot::RwLock;
use tracing::debug;
use url::Url;

use crate::call::ApiCall;
use crate::config::JobConfig;
use crate::error::{JobError, Result};
use crate::job::Job;
use crate::request::Request;
use crate::transport::{PendingReply, Transport};

/// Shared state of one server connection.
///
/// Jobs read the base URL and credential from here and submit through its
/// transport; they never modify it.
pub struct ConnectionData {
	base_url: Url,
	access_token: RwLock<Option<SecretString>>,
	txn_base: u128,
	txn_counter: AtomicU64,
	job_config: JobConfig,
	transport: Arc<dyn Transport>,
}

impl ConnectionData {
	pub fn new(base_url: Url, transport: Arc<dyn Transport>) -> Result<Self> {
		if base_url.cannot_be_a_base() {
			return Err(JobError::InvalidBaseUrl {
				url: base_url.to_string(),
			});
		}

		let txn_base = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_millis())
			.unwrap_or_default();

		Ok(Self {
			base_url,
			access_token: RwLock::new(None),
			txn_base,
			txn_counter: AtomicU64::new(0),
			job_config: JobConfig::default(),
			transport,
		})
	}

	pub fn from_config(config: &CourierConfig, transport: Arc<dyn Transport>) -> Result<Self> {
		let connection = Self::new(config.base_url.clone(), transport)?
			.with_job_config(JobConfig::from(config));
		connection.set_access_token(config.access_token.clone());
		Ok(connection)
	}

	/// Defaults applied to jobs created without an explicit [`JobConfig`].
	pub fn with_job_config(mut self, config: JobConfig) -> Self {
		self.job_config = config;
		self
	}

	pub fn with_access_token(self, token: impl Into<String>) -> Self {
		self.set_access_token(Some(SecretString::new(token.into())));
		self
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	pub fn access_token(&self) -> Option<SecretString> {
		self.access_token.read().clone()
	}

	pub fn set_access_token(&self, token: Option<SecretString>) {
		*self.access_token.write() = token;
	}

	pub fn job_config(&self) -> &JobConfig {
		&self.job_config
	}

	/// A transaction id unique within this connection's lifetime.
	pub fn generate_txn_id(&self) -> String {
		let n = self.txn_counter.fetch_add(1, Ordering::Relaxed) + 1;
		format!("c{}.{}", self.txn_base, n)
	}

	pub fn submit(&self, request: Request) -> PendingReply {
		debug!(
			job = %request.job_name,
			verb = %request.verb,
			url = %request.url,
			"submitting request"
		);
		self.transport.submit(request)
	}

	/// Create and start a job for `call` on this connection.
	pub fn call_api<C: ApiCall>(self: &Arc<Self>, call: C) -> Result<Job<C>> {
		let job = Job::new(Arc::clone(self), call);
		job.start()?;
		Ok(job)
	}
}

impl fmt::Debug for ConnectionData {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionData")
			.field("base_url", &self.base_url.as_str())
			.field("access_token", &*self.access_token.read())
			.field("job_config", &self.job_config)
			.finish_non_exhaustive()
	}
}
