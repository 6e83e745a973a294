// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The customization surface of a call.
//!
//! An [`ApiCall`] describes one kind of server request: where it goes, what
//! it carries and how its reply is judged. The [`Job`](crate::Job) drives
//! the lifecycle and calls back into these hooks in a fixed order:
//!
//! 1. [`ApiCall::before_start`], once, when the job is started
//! 2. [`ApiCall::tls_decision`], for each batch of TLS warnings
//! 3. [`ApiCall::check_reply`], when a reply arrives
//! 4. [`ApiCall::parse_reply`], only if the check passed
//! 5. [`ApiCall::parse_json`], from the default `parse_reply`
//!
//! Any hook that returns `Err` fails the job with that error; later hooks
//! are not run.

use serde_json::Value;

use crate::connection::ConnectionData;
use crate::error::CallError;
use crate::request::{HttpVerb, Query, RequestData};
use crate::transport::{RawReply, TlsDecision, TlsWarning};

pub trait ApiCall: Send + 'static {
	/// Human-readable name used in logs.
	fn name(&self) -> &str;

	fn verb(&self) -> HttpVerb;

	/// Path appended to the connection's base URL. Must not be empty.
	fn api_path(&self) -> String;

	/// Whether the bearer credential is attached.
	fn needs_token(&self) -> bool {
		true
	}

	fn query(&self) -> Query {
		Query::default()
	}

	/// Ignored for GET.
	fn body(&self) -> RequestData {
		RequestData::default()
	}

	/// Last chance to adjust the request from connection state.
	fn before_start(&mut self, _connection: &ConnectionData) {}

	/// Whether to proceed despite TLS warnings. Aborts by default.
	fn tls_decision(&self, _warnings: &[TlsWarning]) -> TlsDecision {
		TlsDecision::Abort
	}

	fn check_reply(&self, reply: &RawReply) -> Result<(), CallError> {
		default_check_reply(reply)
	}

	/// Interpret the reply body. Defaults to JSON decoding plus [`ApiCall::parse_json`].
	fn parse_reply(&mut self, body: &[u8]) -> Result<(), CallError> {
		let json = decode_json(body)?;
		self.parse_json(json)
	}

	fn parse_json(&mut self, _json: Value) -> Result<(), CallError> {
		Ok(())
	}
}

/// Accepts any 2xx reply; anything else is a [`CallError::content_access`]
/// carrying the status line and the server's `errcode`/`error` if present.
/// A reply without a status is a [`CallError::network`].
pub fn default_check_reply(reply: &RawReply) -> Result<(), CallError> {
	let Some(status) = reply.status else {
		return Err(CallError::network("reply carried no HTTP status"));
	};
	if status.is_success() {
		return Ok(());
	}

	let mut message = format!(
		"{} {}",
		status.as_u16(),
		status.canonical_reason().unwrap_or("Unknown Status")
	);
	if let Some(detail) = server_error_detail(&reply.body) {
		message.push_str(": ");
		message.push_str(&detail);
	}
	Err(CallError::content_access(message))
}

fn server_error_detail(body: &[u8]) -> Option<String> {
	let json: Value = serde_json::from_slice(body).ok()?;
	let errcode = json.get("errcode").and_then(Value::as_str);
	let error = json.get("error").and_then(Value::as_str);
	match (errcode, error) {
		(Some(code), Some(error)) => Some(format!("{code}: {error}")),
		(Some(code), None) => Some(code.to_string()),
		(None, Some(error)) => Some(error.to_string()),
		(None, None) => None,
	}
}

/// Decode a reply body as a JSON object or array.
pub fn decode_json(body: &[u8]) -> Result<Value, CallError> {
	match serde_json::from_slice::<Value>(body) {
		Ok(json @ (Value::Object(_) | Value::Array(_))) => Ok(json),
		Ok(other) => Err(CallError::json_parse(format!(
			"expected a JSON object or array, got {other}"
		))),
		Err(e) => Err(CallError::json_parse(e.to_string())),
	}
}
