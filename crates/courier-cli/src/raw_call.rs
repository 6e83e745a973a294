// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use courier_jobs::{ApiCall, CallError, HttpVerb, Query, RequestData, TlsDecision, TlsWarning};
use serde_json::Value;

/// An arbitrary call assembled from command-line arguments.
#[derive(Debug)]
pub struct RawCall {
	pub verb: HttpVerb,
	pub path: String,
	pub query: Query,
	pub body: RequestData,
	pub anonymous: bool,
	pub trust_invalid_certs: bool,
	pub reply: Option<Value>,
}

impl ApiCall for RawCall {
	fn name(&self) -> &str {
		"RawCall"
	}

	fn verb(&self) -> HttpVerb {
		self.verb
	}

	fn api_path(&self) -> String {
		self.path.clone()
	}

	fn needs_token(&self) -> bool {
		!self.anonymous
	}

	fn query(&self) -> Query {
		self.query.clone()
	}

	fn body(&self) -> RequestData {
		self.body.clone()
	}

	fn tls_decision(&self, warnings: &[TlsWarning]) -> TlsDecision {
		if self.trust_invalid_certs {
			for warning in warnings {
				tracing::warn!(warning = %warning.message, "ignoring TLS warning");
			}
			TlsDecision::Continue
		} else {
			TlsDecision::Abort
		}
	}

	fn parse_json(&mut self, json: Value) -> Result<(), CallError> {
		self.reply = Some(json);
		Ok(())
	}
}

/// Parse `key=value` query arguments. The value may itself contain `=`.
pub fn parse_query(pairs: &[String]) -> anyhow::Result<Query> {
	pairs
		.iter()
		.map(|pair| {
			pair.split_once('=')
				.filter(|(key, _)| !key.is_empty())
				.ok_or_else(|| anyhow::anyhow!("query parameter '{pair}' is not KEY=VALUE"))
		})
		.collect::<anyhow::Result<Vec<_>>>()
		.map(|pairs| pairs.into_iter().collect())
}

/// Parse the `--data` argument, which must be a JSON object.
pub fn parse_body(data: Option<&str>) -> anyhow::Result<RequestData> {
	let Some(data) = data else {
		return Ok(RequestData::new());
	};
	match serde_json::from_str::<Value>(data)? {
		Value::Object(map) => Ok(RequestData::from(map)),
		other => anyhow::bail!("request body must be a JSON object, got {other}"),
	}
}
