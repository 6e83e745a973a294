// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory transport for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use url::Url;

use crate::connection::ConnectionData;
use crate::request::Request;
use crate::transport::{PendingReply, RawReply, ReplySink, Transport};

/// Records every submitted request and keeps its sink so the test decides
/// when, and whether, the reply arrives.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
	submissions: Mutex<Vec<(Request, ReplySink)>>,
	auto_reply: Mutex<Option<RawReply>>,
	submitted: Notify,
}

impl ScriptedTransport {
	/// Reply immediately to every request with `reply`.
	pub(crate) fn replying(reply: RawReply) -> Self {
		Self {
			auto_reply: Mutex::new(Some(reply)),
			..Self::default()
		}
	}

	pub(crate) fn count(&self) -> usize {
		self.submissions.lock().len()
	}

	pub(crate) fn request(&self, index: usize) -> Request {
		self.submissions.lock()[index].0.clone()
	}

	/// Wait until the `index`th request (0-based) has been submitted.
	pub(crate) async fn submission(&self, index: usize) -> (Request, ReplySink) {
		loop {
			let submitted = self.submitted.notified();
			if let Some(entry) = self.submissions.lock().get(index).cloned() {
				return entry;
			}
			submitted.await;
		}
	}
}

impl Transport for ScriptedTransport {
	fn submit(&self, request: Request) -> PendingReply {
		let (sink, pending) = PendingReply::channel();
		if let Some(reply) = self.auto_reply.lock().clone() {
			sink.deliver(reply);
		}
		self.submissions.lock().push((request, sink));
		self.submitted.notify_waiters();
		pending
	}
}

pub(crate) fn connection_with(transport: &Arc<ScriptedTransport>) -> Arc<ConnectionData> {
	let transport: Arc<dyn crate::Transport> = transport.clone();
	Arc::new(
		ConnectionData::new(Url::parse("https://hs.example.org").unwrap(), transport)
			.unwrap()
			.with_access_token("syt_test_token"),
	)
}
