// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The seam between a job and whatever moves bytes over the network.
//!
//! A [`Transport`] accepts a [`Request`] and hands back a [`PendingReply`]:
//! a stream of [`TransportEvent`]s plus a cancellation token. Dropping the
//! pending reply cancels the in-flight operation. The transport side of the
//! channel is a [`ReplySink`].

use std::fmt;

use bytes::Bytes;
use courier_common_http::RetryableError;
use http::{HeaderMap, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::request::Request;

/// Submits requests on behalf of jobs.
pub trait Transport: Send + Sync {
	fn submit(&self, request: Request) -> PendingReply;
}

/// What a transport reports about one in-flight request.
#[derive(Debug)]
pub enum TransportEvent {
	/// TLS problems were found; the job decides whether to continue.
	TlsChallenge(TlsChallenge),
	/// A reply arrived, whatever its status.
	Reply(RawReply),
	/// No reply could be obtained.
	Failed(TransportFailure),
}

/// A reply as received from the server.
#[derive(Debug, Clone, Default)]
pub struct RawReply {
	/// `None` when the transport could not determine an HTTP status.
	pub status: Option<StatusCode>,
	pub headers: HeaderMap,
	pub body: Bytes,
}

impl RawReply {
	pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
		Self {
			status: Some(status),
			headers: HeaderMap::new(),
			body: body.into(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
	Connect,
	Timeout,
	Tls,
	Body,
	Other,
}

impl fmt::Display for FailureKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Connect => "connection failed",
			Self::Timeout => "transport timed out",
			Self::Tls => "TLS failure",
			Self::Body => "failed to read reply body",
			Self::Other => "transport error",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
	pub kind: FailureKind,
	pub message: String,
}

impl TransportFailure {
	pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
		}
	}
}

impl fmt::Display for TransportFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.kind, self.message)
	}
}

impl RetryableError for TransportFailure {
	fn is_retryable(&self) -> bool {
		matches!(
			self.kind,
			FailureKind::Connect | FailureKind::Timeout | FailureKind::Body
		)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsWarning {
	pub message: String,
}

impl TlsWarning {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}
}

/// Whether to proceed with a connection that raised TLS warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsDecision {
	Continue,
	#[default]
	Abort,
}

/// A pending question about TLS warnings. Dropping it unanswered aborts.
#[derive(Debug)]
pub struct TlsChallenge {
	warnings: Vec<TlsWarning>,
	responder: oneshot::Sender<TlsDecision>,
}

impl TlsChallenge {
	pub fn warnings(&self) -> &[TlsWarning] {
		&self.warnings
	}

	pub fn respond(self, decision: TlsDecision) {
		let _ = self.responder.send(decision);
	}
}

/// Job side of an in-flight request.
#[derive(Debug)]
pub struct PendingReply {
	events: mpsc::UnboundedReceiver<TransportEvent>,
	cancel: CancellationToken,
}

impl PendingReply {
	/// Create a connected sink and pending reply.
	pub fn channel() -> (ReplySink, PendingReply) {
		let (tx, rx) = mpsc::unbounded_channel();
		let cancel = CancellationToken::new();
		(
			ReplySink {
				events: tx,
				cancel: cancel.clone(),
			},
			PendingReply { events: rx, cancel },
		)
	}

	/// Next event, or `None` once the transport has hung up.
	pub async fn next_event(&mut self) -> Option<TransportEvent> {
		self.events.recv().await
	}

	pub fn cancel(&self) {
		self.cancel.cancel();
	}
}

impl Drop for PendingReply {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

/// Transport side of an in-flight request.
#[derive(Debug, Clone)]
pub struct ReplySink {
	events: mpsc::UnboundedSender<TransportEvent>,
	cancel: CancellationToken,
}

impl ReplySink {
	/// Returns `false` if nobody is waiting for the reply any more.
	pub fn deliver(&self, reply: RawReply) -> bool {
		self.events.send(TransportEvent::Reply(reply)).is_ok()
	}

	pub fn fail(&self, failure: TransportFailure) -> bool {
		self.events.send(TransportEvent::Failed(failure)).is_ok()
	}

	/// Ask the job whether to continue despite `warnings`.
	///
	/// Resolves to [`TlsDecision::Abort`] if the job goes away without
	/// answering.
	pub async fn challenge(&self, warnings: Vec<TlsWarning>) -> TlsDecision {
		let (responder, answer) = oneshot::channel();
		let challenge = TlsChallenge {
			warnings,
			responder,
		};
		if self
			.events
			.send(TransportEvent::TlsChallenge(challenge))
			.is_err()
		{
			return TlsDecision::Abort;
		}
		answer.await.unwrap_or(TlsDecision::Abort)
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Completes when the job no longer wants the reply.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await
	}
}
