// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! [`Transport`] backed by reqwest.

use std::error::Error as StdError;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, warn};

use crate::request::Request;
use crate::transport::{
	FailureKind, PendingReply, RawReply, ReplySink, TlsDecision, TlsWarning, Transport,
	TransportFailure,
};

/// Sends requests over HTTP(S).
///
/// Certificate failures are turned into a TLS challenge; if the job decides
/// to continue, the request is sent again through a client that skips
/// certificate verification.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
	client: Client,
	insecure: Client,
}

impl ReqwestTransport {
	pub fn new() -> Result<Self, reqwest::Error> {
		Ok(Self {
			client: courier_common_http::builder().build()?,
			insecure: courier_common_http::builder()
				.danger_accept_invalid_certs(true)
				.build()?,
		})
	}

	async fn perform(&self, request: &Request, sink: &ReplySink) {
		let err = match send(&self.client, request).await {
			Ok(reply) => {
				sink.deliver(reply);
				return;
			}
			Err(err) => err,
		};

		let Some(certificate) = certificate_error(&err) else {
			sink.fail(failure_from(&err));
			return;
		};

		let warning = certificate.to_string();
		match sink.challenge(vec![TlsWarning::new(warning.clone())]).await {
			TlsDecision::Continue => {
				warn!(job = %request.job_name, url = %request.url, "retrying without certificate verification");
				match send(&self.insecure, request).await {
					Ok(reply) => {
						sink.deliver(reply);
					}
					Err(err) => {
						sink.fail(failure_from(&err));
					}
				}
			}
			TlsDecision::Abort => {
				sink.fail(TransportFailure::new(FailureKind::Tls, warning));
			}
		}
	}
}

impl Transport for ReqwestTransport {
	/// Must be called from within a tokio runtime.
	fn submit(&self, request: Request) -> PendingReply {
		let (sink, pending) = PendingReply::channel();
		let transport = self.clone();

		tokio::spawn(async move {
			tokio::select! {
				biased;
				_ = sink.cancelled() => {
					debug!(job = %request.job_name, url = %request.url, "request cancelled");
				}
				_ = transport.perform(&request, &sink) => {}
			}
		});

		pending
	}
}

async fn send(client: &Client, request: &Request) -> Result<RawReply, reqwest::Error> {
	let mut builder = client.request(request.verb.method(), request.full_url());
	if let Some(token) = &request.access_token {
		builder = builder.bearer_auth(token.expose());
	}
	if let Some(body) = &request.body {
		builder = builder
			.header(CONTENT_TYPE, "application/json")
			.body(body.to_bytes());
	}

	let response = builder.send().await?;
	let status = response.status();
	let headers = response.headers().clone();
	let body = response.bytes().await?;

	Ok(RawReply {
		status: Some(status),
		headers,
		body,
	})
}

/// The error and all of its sources, outermost first.
fn describe(err: &reqwest::Error) -> String {
	let mut message = err.to_string();
	let mut source = err.source();
	while let Some(cause) = source {
		message.push_str(": ");
		message.push_str(&cause.to_string());
		source = cause.source();
	}
	message
}

/// The rustls certificate rejection somewhere in `err`'s source chain.
///
/// hyper reports TLS failures as an `io::Error` wrapping the rustls error,
/// and `io::Error::source` skips the wrapped value, so each `io::Error` is
/// unwrapped explicitly.
fn certificate_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a rustls::Error> {
	let mut source = Some(err);
	while let Some(cause) = source {
		let tls = cause.downcast_ref::<rustls::Error>().or_else(|| {
			cause
				.downcast_ref::<std::io::Error>()
				.and_then(|io| io.get_ref())
				.and_then(|inner| inner.downcast_ref::<rustls::Error>())
		});
		if let Some(tls) = tls.filter(|e| matches!(e, rustls::Error::InvalidCertificate(_))) {
			return Some(tls);
		}
		source = cause.source();
	}
	None
}

fn failure_from(err: &reqwest::Error) -> TransportFailure {
	let kind = if certificate_error(err).is_some() {
		FailureKind::Tls
	} else if err.is_timeout() {
		FailureKind::Timeout
	} else if err.is_connect() {
		FailureKind::Connect
	} else if err.is_body() || err.is_decode() {
		FailureKind::Body
	} else {
		FailureKind::Other
	};
	TransportFailure::new(kind, describe(err))
}
