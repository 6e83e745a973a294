// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outgoing request description handed to a [`Transport`](crate::Transport).

use std::fmt;

use courier_common_config::SecretString;
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

/// HTTP method of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVerb {
	Get,
	Put,
	Post,
	Delete,
}

impl HttpVerb {
	pub fn method(&self) -> http::Method {
		match self {
			Self::Get => http::Method::GET,
			Self::Put => http::Method::PUT,
			Self::Post => http::Method::POST,
			Self::Delete => http::Method::DELETE,
		}
	}

	/// GET requests never carry a body.
	pub fn sends_body(&self) -> bool {
		!matches!(self, Self::Get)
	}
}

impl fmt::Display for HttpVerb {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.method().as_str())
	}
}

/// Ordered query parameters. Duplicate keys are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(Vec<(String, String)>);

impl Query {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.add(key, value);
		self
	}

	pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.0.push((key.into(), value.into()));
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn pairs(&self) -> &[(String, String)] {
		&self.0
	}
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Query {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}

/// JSON object sent as the request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestData(Map<String, Value>);

impl RequestData {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(key.into(), value.into());
		self
	}

	/// Serialize any value that maps to a JSON object.
	pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
		match serde_json::to_value(value)? {
			Value::Object(map) => Ok(Self(map)),
			other => Err(serde::ser::Error::custom(format!(
				"request body must be a JSON object, got {other}"
			))),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}

	/// Encoded body bytes; an empty body encodes as `{}`.
	pub fn to_bytes(&self) -> Vec<u8> {
		Value::Object(self.0.clone()).to_string().into_bytes()
	}
}

impl From<Map<String, Value>> for RequestData {
	fn from(map: Map<String, Value>) -> Self {
		Self(map)
	}
}

/// A fully resolved request for one attempt of a job.
#[derive(Debug, Clone)]
pub struct Request {
	pub job_name: String,
	pub verb: HttpVerb,
	pub url: Url,
	pub query: Query,
	/// Present for every verb except GET.
	pub body: Option<RequestData>,
	pub access_token: Option<SecretString>,
}

impl Request {
	/// Endpoint URL with the query string applied.
	pub fn full_url(&self) -> Url {
		let mut url = self.url.clone();
		if !self.query.is_empty() {
			url.query_pairs_mut()
				.extend_pairs(self.query.pairs().iter().map(|(k, v)| (k.as_str(), v.as_str())));
		}
		url
	}
}

/// Append `path` to the path of `base`, keeping any prefix the base carries.
pub(crate) fn endpoint_url(base: &Url, path: &str) -> Url {
	let mut url = base.clone();
	let joined = format!(
		"{}/{}",
		base.path().trim_end_matches('/'),
		path.trim_start_matches('/')
	);
	url.set_path(&joined);
	url.set_query(None);
	url
}
