// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The job state machine.
//!
//! A [`Job`] wraps an [`ApiCall`] and drives it through one request/reply
//! exchange (or several, when a retry policy is configured). It is
//! single-use: after it terminates it disposes of its event channel and
//! rejects a second start.
//!
//! Reply, timeout and abandonment race on one task; whichever claims the
//! job first decides the outcome and the others become no-ops.

use std::sync::Arc;

use courier_common_http::RetryableError;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::call::ApiCall;
use crate::config::JobConfig;
use crate::connection::ConnectionData;
use crate::error::{CallError, ErrorCode, JobError, Result};
use crate::events::{JobEvent, JobId, JobPhase};
use crate::request::{endpoint_url, HttpVerb, Request};
use crate::transport::{FailureKind, RawReply, TlsDecision, TransportEvent, TransportFailure};

/// Upper bound on the event buffer; the terminal events always fit.
const MAX_EVENT_CAPACITY: usize = 1024;

/// Room for every `RetryScheduled` plus the three terminal events.
fn event_capacity(config: &JobConfig) -> usize {
	let attempts = config.retry.as_ref().map_or(1, |retry| retry.max_attempts.max(1));
	(attempts as usize).saturating_add(3).min(MAX_EVENT_CAPACITY)
}

/// Handle to a remote call job. Clones share the same job.
pub struct Job<C: ApiCall> {
	shared: Arc<Shared<C>>,
}

impl<C: ApiCall> Clone for Job<C> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

struct Shared<C> {
	id: JobId,
	name: String,
	verb: HttpVerb,
	needs_token: bool,
	config: JobConfig,
	connection: Arc<ConnectionData>,
	call: Mutex<C>,
	state: Mutex<JobState>,
	phase: watch::Sender<JobPhase>,
}

struct JobState {
	phase: JobPhase,
	error: ErrorCode,
	error_text: String,
	/// A `start` call is running the request hooks.
	starting: bool,
	/// Set once the outcome has been claimed; `abandon` is then a no-op.
	settling: bool,
	cancel: Option<CancellationToken>,
	/// `None` once the job is disposed.
	events: Option<broadcast::Sender<JobEvent>>,
}

impl JobState {
	/// Only the first error is kept.
	fn record_error(&mut self, error: &CallError) -> bool {
		if self.error.is_error() {
			return false;
		}
		self.error = error.code();
		self.error_text = error.message().to_string();
		true
	}
}

enum Attempt {
	Replied(RawReply),
	Failed(TransportFailure),
	TimedOut,
	TlsRejected(String),
}

impl<C: ApiCall> Job<C> {
	/// Create a job using the connection's default [`JobConfig`].
	pub fn new(connection: Arc<ConnectionData>, call: C) -> Self {
		let config = connection.job_config().clone();
		Self::with_config(connection, call, config)
	}

	pub fn with_config(connection: Arc<ConnectionData>, call: C, config: JobConfig) -> Self {
		let (events, _) = broadcast::channel(event_capacity(&config));
		let (phase, _) = watch::channel(JobPhase::Created);

		Self {
			shared: Arc::new(Shared {
				id: JobId::new(),
				name: call.name().to_string(),
				verb: call.verb(),
				needs_token: call.needs_token(),
				config,
				connection,
				call: Mutex::new(call),
				state: Mutex::new(JobState {
					phase: JobPhase::Created,
					error: ErrorCode::NoError,
					error_text: String::new(),
					starting: false,
					settling: false,
					cancel: None,
					events: Some(events),
				}),
				phase,
			}),
		}
	}

	pub fn id(&self) -> JobId {
		self.shared.id
	}

	pub fn name(&self) -> &str {
		&self.shared.name
	}

	pub fn verb(&self) -> HttpVerb {
		self.shared.verb
	}

	pub fn needs_token(&self) -> bool {
		self.shared.needs_token
	}

	pub fn config(&self) -> &JobConfig {
		&self.shared.config
	}

	pub fn phase(&self) -> JobPhase {
		self.shared.state.lock().phase
	}

	pub fn is_disposed(&self) -> bool {
		let state = self.shared.state.lock();
		state.phase.is_terminal() && state.events.is_none()
	}

	/// [`ErrorCode::NoError`] unless the job failed.
	pub fn error(&self) -> ErrorCode {
		self.shared.state.lock().error
	}

	/// Empty until an error has been recorded.
	pub fn error_string(&self) -> String {
		self.shared.state.lock().error_text.clone()
	}

	/// Receive this job's events. After disposal the receiver is already closed.
	pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
		match &self.shared.state.lock().events {
			Some(events) => events.subscribe(),
			None => broadcast::channel(1).1,
		}
	}

	/// Wait for a terminal phase. Never resolves for a job that is not started.
	pub async fn finished(&self) -> JobPhase {
		let mut phase = self.shared.phase.subscribe();
		let terminal = match phase.wait_for(JobPhase::is_terminal).await {
			Ok(reached) => *reached,
			Err(_) => self.phase(),
		};
		terminal
	}

	/// Run `f` against the call, e.g. to read what `parse_json` stored.
	pub fn inspect<R>(&self, f: impl FnOnce(&C) -> R) -> R {
		f(&self.shared.call.lock())
	}

	/// Build the request and hand it to the transport on a background task.
	///
	/// Returns immediately; the outcome is reported through events. A job can
	/// be started once and only inside a tokio runtime.
	pub fn start(&self) -> Result<()> {
		let shared = &self.shared;
		let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
			error!(job_id = %shared.id, job = %shared.name, "job started outside a tokio runtime");
			JobError::NoRuntime {
				name: shared.name.clone(),
			}
		})?;

		let mut state = shared.state.lock();
		match state.phase {
			JobPhase::Created if !state.starting => {}
			JobPhase::Created | JobPhase::Running => {
				error!(job_id = %shared.id, job = %shared.name, "job started twice");
				return Err(JobError::AlreadyStarted {
					name: shared.name.clone(),
				});
			}
			phase => {
				error!(job_id = %shared.id, job = %shared.name, %phase, "terminated job started again");
				return Err(JobError::Terminated {
					name: shared.name.clone(),
					phase,
				});
			}
		}

		state.starting = true;
		drop(state);

		// Hooks run without the state lock so `inspect` callers may read it.
		let prepared = {
			let mut call = shared.call.lock();
			call.before_start(&shared.connection);
			let path = call.api_path();
			if path.trim().is_empty() {
				None
			} else {
				Some(shared.prepare_request(&call, &path))
			}
		};

		let mut state = shared.state.lock();
		state.starting = false;
		let Some(prepared) = prepared else {
			error!(job_id = %shared.id, job = %shared.name, "job has no API path");
			return Err(JobError::EmptyPath {
				name: shared.name.clone(),
			});
		};
		if state.phase != JobPhase::Created {
			let phase = state.phase;
			debug!(job_id = %shared.id, job = %shared.name, %phase, "job abandoned while starting");
			return Err(JobError::Terminated {
				name: shared.name.clone(),
				phase,
			});
		}

		let cancel = CancellationToken::new();
		state.phase = JobPhase::Running;
		state.cancel = Some(cancel.clone());
		drop(state);
		shared.phase.send_replace(JobPhase::Running);

		debug!(job_id = %shared.id, job = %shared.name, verb = %shared.verb, "job started");
		runtime.spawn(drive(Arc::clone(shared), prepared, cancel));
		Ok(())
	}

	/// Stop the job without emitting any outcome.
	///
	/// No-op once the job has terminated or its outcome is being reported.
	pub fn abandon(&self) {
		let shared = &self.shared;
		let mut state = shared.state.lock();
		if state.phase.is_terminal() || state.settling {
			trace!(job_id = %shared.id, job = %shared.name, "abandon ignored, job already finished");
			return;
		}

		state.phase = JobPhase::Abandoned;
		if let Some(cancel) = state.cancel.take() {
			cancel.cancel();
		}
		state.events = None;
		drop(state);
		shared.phase.send_replace(JobPhase::Abandoned);

		debug!(job_id = %shared.id, job = %shared.name, "job abandoned");
	}
}

impl<C: ApiCall> Shared<C> {
	fn prepare_request(&self, call: &C, path: &str) -> std::result::Result<Request, CallError> {
		let access_token = if self.needs_token {
			match self.connection.access_token() {
				Some(token) => Some(token),
				None => {
					return Err(CallError::content_access(
						"no access token available for an authenticated call",
					))
				}
			}
		} else {
			None
		};

		Ok(Request {
			job_name: self.name.clone(),
			verb: self.verb,
			url: endpoint_url(self.connection.base_url(), path),
			query: call.query(),
			body: self.verb.sends_body().then(|| call.body()),
			access_token,
		})
	}

	async fn attempt(&self, request: &Request, attempt: u32) -> Attempt {
		trace!(job_id = %self.id, job = %self.name, attempt, "attempt started");
		let mut pending = self.connection.submit(request.clone());
		let deadline = tokio::time::sleep(self.config.timeout);
		tokio::pin!(deadline);

		loop {
			let event = tokio::select! {
				biased;
				event = pending.next_event() => event,
				_ = &mut deadline => {
					debug!(job_id = %self.id, job = %self.name, attempt, "no reply before deadline");
					return Attempt::TimedOut;
				}
			};

			match event {
				Some(TransportEvent::Reply(reply)) => return Attempt::Replied(reply),
				Some(TransportEvent::Failed(failure)) => return Attempt::Failed(failure),
				Some(TransportEvent::TlsChallenge(challenge)) => {
					let decision = self.call.lock().tls_decision(challenge.warnings());
					let summary = challenge
						.warnings()
						.iter()
						.map(|w| w.message.as_str())
						.collect::<Vec<_>>()
						.join("; ");
					challenge.respond(decision);

					if decision == TlsDecision::Abort {
						warn!(job_id = %self.id, job = %self.name, warnings = %summary, "aborting on TLS warnings");
						return Attempt::TlsRejected(format!("TLS verification failed: {summary}"));
					}
					warn!(job_id = %self.id, job = %self.name, warnings = %summary, "continuing despite TLS warnings");
				}
				None => {
					return Attempt::Failed(TransportFailure::new(
						FailureKind::Other,
						"transport closed without a reply",
					))
				}
			}
		}
	}

	fn retry_reason(&self, outcome: &Attempt, attempt: u32) -> Option<String> {
		let retry = self.config.retry.as_ref()?;
		if !retry.allows_another(attempt) {
			return None;
		}
		match outcome {
			Attempt::Replied(reply) => reply
				.status
				.filter(|status| retry.is_retryable_status(*status))
				.map(|status| format!("server replied {status}")),
			Attempt::Failed(failure) if failure.is_retryable() => Some(failure.to_string()),
			Attempt::TimedOut => Some("no reply before deadline".to_string()),
			_ => None,
		}
	}

	/// Announce and wait out the backoff. `false` if the job was abandoned.
	async fn schedule_retry(&self, attempt: u32, reason: &str, cancel: &CancellationToken) -> bool {
		let Some(retry) = self.config.retry.as_ref() else {
			return false;
		};
		let delay = retry.delay_for_attempt(attempt);

		{
			let state = self.state.lock();
			if state.phase != JobPhase::Running {
				return false;
			}
			if let Some(events) = &state.events {
				let _ = events.send(JobEvent::RetryScheduled {
					job: self.id,
					next_attempt: attempt + 1,
					delay,
				});
			}
		}

		warn!(
			job_id = %self.id,
			job = %self.name,
			attempt,
			delay_ms = delay.as_millis() as u64,
			reason,
			"call failed, retrying"
		);

		tokio::select! {
			biased;
			_ = cancel.cancelled() => false,
			_ = tokio::time::sleep(delay) => true,
		}
	}

	/// Claim the right to report an outcome. `false` if the job was abandoned.
	fn begin_settle(&self) -> bool {
		let mut state = self.state.lock();
		if state.phase != JobPhase::Running {
			return false;
		}
		state.settling = true;
		true
	}

	fn process_reply(&self, reply: RawReply) -> std::result::Result<(), CallError> {
		let mut call = self.call.lock();
		call.check_reply(&reply)?;
		call.parse_reply(&reply.body)
	}

	/// Record the outcome, emit the terminal events and dispose.
	fn settle(&self, result: std::result::Result<(), CallError>) {
		let (phase, events) = {
			let mut state = self.state.lock();
			let phase = match &result {
				Ok(()) => JobPhase::Succeeded,
				Err(error) => {
					state.record_error(error);
					JobPhase::Failed
				}
			};
			state.phase = phase;
			state.cancel = None;
			(phase, state.events.take())
		};

		match &result {
			Ok(()) => info!(job_id = %self.id, job = %self.name, "job succeeded"),
			Err(error) => warn!(
				job_id = %self.id,
				job = %self.name,
				error_code = error.code().as_i32(),
				error = error.message(),
				"job failed"
			),
		}

		if let Some(events) = events {
			let _ = events.send(JobEvent::Finished(self.id));
			let _ = events.send(JobEvent::Result(self.id));
			let outcome = match result {
				Ok(()) => JobEvent::Success(self.id),
				Err(error) => JobEvent::Failure { job: self.id, error },
			};
			let _ = events.send(outcome);
		}
		self.phase.send_replace(phase);
	}
}

async fn drive<C: ApiCall>(
	shared: Arc<Shared<C>>,
	prepared: std::result::Result<Request, CallError>,
	cancel: CancellationToken,
) {
	let request = match prepared {
		Ok(request) => request,
		Err(error) => {
			if shared.begin_settle() {
				shared.settle(Err(error));
			}
			return;
		}
	};

	let mut attempt = 1;
	loop {
		let outcome = tokio::select! {
			biased;
			_ = cancel.cancelled() => return,
			outcome = shared.attempt(&request, attempt) => outcome,
		};

		if let Some(reason) = shared.retry_reason(&outcome, attempt) {
			if !shared.schedule_retry(attempt, &reason, &cancel).await {
				return;
			}
			attempt += 1;
			continue;
		}

		if !shared.begin_settle() {
			return;
		}
		let result = match outcome {
			Attempt::Replied(reply) => shared.process_reply(reply),
			Attempt::Failed(failure) => Err(CallError::network(failure.to_string())),
			Attempt::TimedOut => Err(CallError::timeout(format!(
				"no reply within {:?}",
				shared.config.timeout
			))),
			Attempt::TlsRejected(message) => Err(CallError::network(message)),
		};
		shared.settle(result);
		return;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::call::default_check_reply;
	use crate::request::RequestData;
	use crate::testing::{connection_with, ScriptedTransport};
	use crate::transport::TlsWarning;
	use courier_common_http::RetryConfig;
	use http::StatusCode;
	use serde_json::Value;
	use std::time::Duration;
	use tokio::sync::broadcast::error::RecvError;
	use url::Url;

	#[derive(Default)]
	struct TestCall {
		verb: Option<HttpVerb>,
		path: String,
		anonymous: bool,
		trust_bad_tls: bool,
		require_field: Option<&'static str>,
		with_txn: bool,
		txn_id: Option<String>,
		stages: Vec<&'static str>,
		json: Option<Value>,
	}

	impl TestCall {
		fn get(path: &str) -> Self {
			Self {
				path: path.to_string(),
				..Self::default()
			}
		}
	}

	impl ApiCall for TestCall {
		fn name(&self) -> &str {
			"TestJob"
		}

		fn verb(&self) -> HttpVerb {
			self.verb.unwrap_or(HttpVerb::Get)
		}

		fn api_path(&self) -> String {
			match &self.txn_id {
				Some(txn) => format!("{}/{}", self.path, txn),
				None => self.path.clone(),
			}
		}

		fn needs_token(&self) -> bool {
			!self.anonymous
		}

		fn body(&self) -> RequestData {
			RequestData::new().with("body", "hello")
		}

		fn before_start(&mut self, connection: &ConnectionData) {
			self.stages.push("before_start");
			if self.with_txn {
				self.txn_id = Some(connection.generate_txn_id());
			}
		}

		fn tls_decision(&self, _warnings: &[TlsWarning]) -> TlsDecision {
			if self.trust_bad_tls {
				TlsDecision::Continue
			} else {
				TlsDecision::Abort
			}
		}

		fn parse_json(&mut self, json: Value) -> std::result::Result<(), CallError> {
			self.stages.push("parse_json");
			if let Some(field) = self.require_field {
				if json.get(field).is_none() {
					return Err(CallError::user(
						"test",
						1,
						format!("No {field} in the JSON response"),
					));
				}
			}
			self.json = Some(json);
			Ok(())
		}
	}

	/// Downloads raw bytes instead of JSON.
	#[derive(Default)]
	struct ThumbnailCall {
		image: Vec<u8>,
	}

	impl ApiCall for ThumbnailCall {
		fn name(&self) -> &str {
			"MediaThumbnailJob"
		}

		fn verb(&self) -> HttpVerb {
			HttpVerb::Get
		}

		fn api_path(&self) -> String {
			"/_matrix/media/r0/thumbnail/example.org/abc".to_string()
		}

		fn check_reply(&self, reply: &RawReply) -> std::result::Result<(), CallError> {
			default_check_reply(reply)
		}

		fn parse_reply(&mut self, body: &[u8]) -> std::result::Result<(), CallError> {
			if body.is_empty() {
				return Err(CallError::user("media", 1, "empty thumbnail"));
			}
			self.image = body.to_vec();
			Ok(())
		}
	}

	async fn drain(mut events: broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
		let mut seen = Vec::new();
		loop {
			match events.recv().await {
				Ok(event) => seen.push(event),
				Err(RecvError::Closed) => return seen,
				Err(RecvError::Lagged(n)) => panic!("lagged by {n} events"),
			}
		}
	}

	fn failure_code(events: &[JobEvent]) -> Option<ErrorCode> {
		match events.last() {
			Some(JobEvent::Failure { error, .. }) => Some(error.code()),
			_ => None,
		}
	}

	fn retrying(max_attempts: u32) -> JobConfig {
		JobConfig::default().with_retry(RetryConfig {
			max_attempts,
			base_delay: Duration::from_millis(100),
			jitter: false,
			..RetryConfig::default()
		})
	}

	fn anonymous_connection(transport: &Arc<ScriptedTransport>) -> Arc<ConnectionData> {
		let transport: Arc<dyn crate::Transport> = transport.clone();
		Arc::new(
			ConnectionData::new(Url::parse("https://hs.example.org").unwrap(), transport)
				.unwrap(),
		)
	}

	#[tokio::test]
	async fn successful_call_emits_finished_result_success() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(StatusCode::OK, "{}")));
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		let events = job.subscribe();
		job.start().unwrap();

		let id = job.id();
		assert_eq!(
			drain(events).await,
			vec![JobEvent::Finished(id), JobEvent::Result(id), JobEvent::Success(id)]
		);
		assert_eq!(job.phase(), JobPhase::Succeeded);
		assert_eq!(job.error(), ErrorCode::NoError);
		assert!(job.error_string().is_empty());
		assert!(job.is_disposed());

		let request = transport.request(0);
		assert_eq!(request.verb, HttpVerb::Get);
		assert_eq!(request.url.as_str(), "https://hs.example.org/ping");
		assert!(request.body.is_none());
		assert_eq!(request.access_token.unwrap().expose(), "syt_test_token");
		job.inspect(|call| {
			assert_eq!(call.stages, ["before_start", "parse_json"]);
			assert_eq!(call.json, Some(serde_json::json!({})));
		});
	}

	#[tokio::test]
	async fn error_status_fails_with_content_access_and_skips_parsing() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(
			StatusCode::NOT_FOUND,
			r#"{"errcode":"M_NOT_FOUND","error":"Unknown room"}"#,
		)));
		let job = Job::new(connection_with(&transport), TestCall::get("/rooms/unknown"));
		let events = job.subscribe();
		job.start().unwrap();

		let events = drain(events).await;
		assert_eq!(events.len(), 3);
		assert_eq!(failure_code(&events), Some(ErrorCode::ContentAccessError));
		assert_eq!(job.error(), ErrorCode::ContentAccessError);
		assert!(job.error_string().contains("M_NOT_FOUND"));
		job.inspect(|call| assert_eq!(call.stages, ["before_start"]));
	}

	#[tokio::test]
	async fn malformed_body_fails_with_json_parse_error() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(
			StatusCode::OK,
			"not-json",
		)));
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		job.start().unwrap();

		assert_eq!(job.finished().await, JobPhase::Failed);
		assert_eq!(job.error(), ErrorCode::JsonParseError);
		job.inspect(|call| assert!(call.json.is_none()));
	}

	#[tokio::test(start_paused = true)]
	async fn missing_reply_times_out_and_cancels_request() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::with_config(
			connection_with(&transport),
			TestCall::get("/sync"),
			JobConfig::default().with_timeout(Duration::from_secs(5)),
		);
		let events = job.subscribe();
		job.start().unwrap();
		let (_, sink) = transport.submission(0).await;

		assert_eq!(job.finished().await, JobPhase::Failed);
		assert_eq!(job.error(), ErrorCode::TimeoutError);
		assert!(sink.is_cancelled());

		// A reply that shows up after the deadline goes nowhere.
		assert!(!sink.deliver(RawReply::new(StatusCode::OK, "{}")));
		let events = drain(events).await;
		assert_eq!(events.len(), 3);
		assert_eq!(failure_code(&events), Some(ErrorCode::TimeoutError));
	}

	#[tokio::test]
	async fn abandon_before_reply_is_silent() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get("/sync"));
		let events = job.subscribe();
		job.start().unwrap();
		let (_, sink) = transport.submission(0).await;

		job.abandon();
		assert_eq!(job.phase(), JobPhase::Abandoned);
		assert!(job.is_disposed());
		assert!(drain(events).await.is_empty());

		sink.cancelled().await;
		assert!(!sink.deliver(RawReply::new(StatusCode::OK, "{}")));
		assert_eq!(job.error(), ErrorCode::NoError);
		assert_eq!(job.finished().await, JobPhase::Abandoned);
		job.inspect(|call| assert_eq!(call.stages, ["before_start"]));
	}

	#[tokio::test]
	async fn abandon_after_termination_is_noop() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(StatusCode::OK, "{}")));
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		job.start().unwrap();
		assert_eq!(job.finished().await, JobPhase::Succeeded);

		job.abandon();
		job.abandon();
		assert_eq!(job.phase(), JobPhase::Succeeded);
		assert_eq!(job.error(), ErrorCode::NoError);
	}

	#[tokio::test]
	async fn subscribing_after_disposal_yields_closed_receiver() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(StatusCode::OK, "{}")));
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		job.start().unwrap();
		job.finished().await;

		let mut late = job.subscribe();
		assert!(matches!(late.recv().await, Err(RecvError::Closed)));
	}

	#[tokio::test]
	async fn abandoned_before_start_cannot_start() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		job.abandon();

		assert!(matches!(
			job.start(),
			Err(JobError::Terminated {
				phase: JobPhase::Abandoned,
				..
			})
		));
		assert_eq!(transport.count(), 0);
	}

	#[tokio::test]
	async fn second_start_is_rejected() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get("/sync"));
		job.start().unwrap();

		assert!(matches!(job.start(), Err(JobError::AlreadyStarted { .. })));
		assert_eq!(job.phase(), JobPhase::Running);
		job.abandon();
	}

	#[tokio::test]
	async fn finished_job_cannot_restart() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(StatusCode::OK, "{}")));
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		job.start().unwrap();
		job.finished().await;

		assert!(matches!(
			job.start(),
			Err(JobError::Terminated {
				phase: JobPhase::Succeeded,
				..
			})
		));
		assert_eq!(transport.count(), 1);
	}

	#[test]
	fn start_outside_runtime_is_rejected() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		assert!(matches!(job.start(), Err(JobError::NoRuntime { .. })));
		assert_eq!(job.phase(), JobPhase::Created);
	}

	#[tokio::test]
	async fn empty_path_is_rejected() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get(""));
		assert!(matches!(job.start(), Err(JobError::EmptyPath { .. })));
		assert_eq!(job.phase(), JobPhase::Created);
	}

	#[tokio::test]
	async fn missing_token_fails_without_submitting() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(StatusCode::OK, "{}")));
		let job = Job::new(anonymous_connection(&transport), TestCall::get("/account/whoami"));
		let events = job.subscribe();
		job.start().unwrap();

		let events = drain(events).await;
		assert_eq!(failure_code(&events), Some(ErrorCode::ContentAccessError));
		assert_eq!(transport.count(), 0);
	}

	#[tokio::test]
	async fn anonymous_call_sends_no_token() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(StatusCode::OK, "{}")));
		let call = TestCall {
			anonymous: true,
			..TestCall::get("/login")
		};
		let job = Job::new(anonymous_connection(&transport), call);
		job.start().unwrap();

		assert_eq!(job.finished().await, JobPhase::Succeeded);
		assert!(transport.request(0).access_token.is_none());
	}

	#[tokio::test]
	async fn post_carries_body() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(StatusCode::OK, "{}")));
		let call = TestCall {
			verb: Some(HttpVerb::Post),
			..TestCall::get("/createRoom")
		};
		let job = Job::new(connection_with(&transport), call);
		job.start().unwrap();
		job.finished().await;

		let body = transport.request(0).body.unwrap();
		assert_eq!(body.as_map().get("body"), Some(&Value::from("hello")));
	}

	#[tokio::test]
	async fn transport_failure_is_network_error() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		job.start().unwrap();
		let (_, sink) = transport.submission(0).await;
		sink.fail(TransportFailure::new(FailureKind::Connect, "connection refused"));

		assert_eq!(job.finished().await, JobPhase::Failed);
		assert_eq!(job.error(), ErrorCode::NetworkError);
		assert!(job.error_string().contains("connection refused"));
	}

	#[tokio::test]
	async fn tls_warnings_abort_by_default() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		job.start().unwrap();
		let (_, sink) = transport.submission(0).await;

		let decision = sink
			.challenge(vec![TlsWarning::new("self-signed certificate")])
			.await;
		assert_eq!(decision, TlsDecision::Abort);
		assert_eq!(job.finished().await, JobPhase::Failed);
		assert_eq!(job.error(), ErrorCode::NetworkError);
		assert!(job.error_string().contains("self-signed certificate"));
	}

	#[tokio::test]
	async fn tls_warnings_can_be_accepted() {
		let transport = Arc::new(ScriptedTransport::default());
		let call = TestCall {
			trust_bad_tls: true,
			..TestCall::get("/ping")
		};
		let job = Job::new(connection_with(&transport), call);
		job.start().unwrap();
		let (_, sink) = transport.submission(0).await;

		let decision = sink.challenge(vec![TlsWarning::new("expired")]).await;
		assert_eq!(decision, TlsDecision::Continue);
		sink.deliver(RawReply::new(StatusCode::OK, "{}"));
		assert_eq!(job.finished().await, JobPhase::Succeeded);
	}

	#[tokio::test]
	async fn parse_json_can_fail_with_user_code() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(StatusCode::OK, "{}")));
		let call = TestCall {
			verb: Some(HttpVerb::Put),
			require_field: Some("event_id"),
			..TestCall::get("/send")
		};
		let job = Job::new(connection_with(&transport), call);
		job.start().unwrap();

		assert_eq!(job.finished().await, JobPhase::Failed);
		assert_eq!(job.error(), ErrorCode::user("test", 1));
		assert_eq!(job.error_string(), "No event_id in the JSON response");
	}

	#[tokio::test]
	async fn raw_reply_parsing_skips_json() {
		let png = b"\x89PNG\r\n\x1a\n".to_vec();
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(
			StatusCode::OK,
			png.clone(),
		)));
		let job = Job::new(connection_with(&transport), ThumbnailCall::default());
		job.start().unwrap();

		assert_eq!(job.finished().await, JobPhase::Succeeded);
		job.inspect(|call| assert_eq!(call.image, png));
	}

	#[tokio::test]
	async fn before_start_can_use_connection_state() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(
			StatusCode::OK,
			r#"{"event_id":"$abc"}"#,
		)));
		let call = TestCall {
			verb: Some(HttpVerb::Put),
			with_txn: true,
			..TestCall::get("/send")
		};
		let job = Job::new(connection_with(&transport), call);
		job.start().unwrap();
		job.finished().await;

		let txn = job.inspect(|call| call.txn_id.clone()).unwrap();
		assert_eq!(
			transport.request(0).url.path(),
			format!("/send/{txn}")
		);
	}

	#[tokio::test(start_paused = true)]
	async fn retry_after_transport_failure() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::with_config(connection_with(&transport), TestCall::get("/sync"), retrying(3));
		let events = job.subscribe();
		job.start().unwrap();

		let (_, first) = transport.submission(0).await;
		first.fail(TransportFailure::new(FailureKind::Connect, "connection reset"));
		let (_, second) = transport.submission(1).await;
		second.deliver(RawReply::new(StatusCode::OK, "{}"));

		let id = job.id();
		assert_eq!(
			drain(events).await,
			vec![
				JobEvent::RetryScheduled {
					job: id,
					next_attempt: 2,
					delay: Duration::from_millis(100),
				},
				JobEvent::Finished(id),
				JobEvent::Result(id),
				JobEvent::Success(id),
			]
		);
		assert_eq!(job.error(), ErrorCode::NoError);
	}

	#[tokio::test(start_paused = true)]
	async fn retries_exhausted_reports_last_reply() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(
			StatusCode::SERVICE_UNAVAILABLE,
			"{}",
		)));
		let job = Job::with_config(connection_with(&transport), TestCall::get("/sync"), retrying(2));
		let events = job.subscribe();
		job.start().unwrap();

		let events = drain(events).await;
		assert!(matches!(
			events[0],
			JobEvent::RetryScheduled { next_attempt: 2, .. }
		));
		assert_eq!(events.len(), 4);
		assert_eq!(failure_code(&events), Some(ErrorCode::ContentAccessError));
		assert_eq!(transport.count(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn no_retry_without_policy() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(
			StatusCode::SERVICE_UNAVAILABLE,
			"{}",
		)));
		let job = Job::new(connection_with(&transport), TestCall::get("/sync"));
		job.start().unwrap();

		assert_eq!(job.finished().await, JobPhase::Failed);
		assert_eq!(transport.count(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn abandon_during_backoff_stops_retrying() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::with_config(connection_with(&transport), TestCall::get("/sync"), retrying(3));
		let mut events = job.subscribe();
		job.start().unwrap();

		let (_, first) = transport.submission(0).await;
		first.fail(TransportFailure::new(FailureKind::Timeout, "read timed out"));
		assert!(matches!(
			events.recv().await,
			Ok(JobEvent::RetryScheduled { .. })
		));

		job.abandon();
		tokio::time::sleep(Duration::from_secs(10)).await;
		assert!(drain(events).await.is_empty());
		assert_eq!(transport.count(), 1);
		assert_eq!(job.phase(), JobPhase::Abandoned);
	}

	#[tokio::test]
	async fn call_api_starts_the_job() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(StatusCode::OK, "{}")));
		let connection = connection_with(&transport);
		let job = connection.call_api(TestCall::get("/ping")).unwrap();

		assert_eq!(job.clone().finished().await, JobPhase::Succeeded);
		assert_eq!(transport.count(), 1);
	}

	#[tokio::test]
	async fn failure_then_reply_reports_single_outcome() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get("/ping"));
		let events = job.subscribe();
		job.start().unwrap();
		let (_, sink) = transport.submission(0).await;

		sink.fail(TransportFailure::new(FailureKind::Connect, "connection reset"));
		sink.deliver(RawReply::new(StatusCode::OK, "{}"));

		let id = job.id();
		let events = drain(events).await;
		assert_eq!(events.len(), 3);
		assert_eq!(events[0], JobEvent::Finished(id));
		assert_eq!(events[1], JobEvent::Result(id));
		assert_eq!(failure_code(&events), Some(ErrorCode::NetworkError));
		assert_eq!(job.phase(), JobPhase::Failed);
	}

	#[tokio::test(start_paused = true)]
	async fn reply_ready_at_the_deadline_wins() {
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::with_config(
			connection_with(&transport),
			TestCall::get("/sync"),
			JobConfig::default().with_timeout(Duration::from_secs(5)),
		);
		let events = job.subscribe();
		job.start().unwrap();
		let (_, sink) = transport.submission(0).await;

		// Both the reply and the elapsed deadline are ready on the next poll.
		sink.deliver(RawReply::new(StatusCode::OK, "{}"));
		tokio::time::advance(Duration::from_secs(5)).await;

		let id = job.id();
		assert_eq!(
			drain(events).await,
			vec![JobEvent::Finished(id), JobEvent::Result(id), JobEvent::Success(id)]
		);
		assert_eq!(job.error(), ErrorCode::NoError);
	}

	#[tokio::test(start_paused = true)]
	async fn event_buffer_holds_every_retry_notice() {
		let transport = Arc::new(ScriptedTransport::replying(RawReply::new(
			StatusCode::SERVICE_UNAVAILABLE,
			"{}",
		)));
		let job = Job::with_config(connection_with(&transport), TestCall::get("/sync"), retrying(20));
		let events = job.subscribe();
		job.start().unwrap();
		assert_eq!(job.finished().await, JobPhase::Failed);

		let events = drain(events).await;
		let retries = events
			.iter()
			.filter(|event| matches!(event, JobEvent::RetryScheduled { .. }))
			.count();
		assert_eq!(retries, 19);
		assert_eq!(events.len(), 22);
		assert_eq!(failure_code(&events), Some(ErrorCode::ContentAccessError));
	}

	#[test]
	fn event_capacity_follows_attempt_budget() {
		assert_eq!(event_capacity(&JobConfig::default()), 4);
		assert_eq!(event_capacity(&retrying(20)), 23);
		assert_eq!(event_capacity(&retrying(u32::MAX)), MAX_EVENT_CAPACITY);
	}

	#[test]
	fn inspect_can_read_state_while_start_waits_for_the_call() {
		let runtime = tokio::runtime::Builder::new_multi_thread()
			.worker_threads(1)
			.enable_all()
			.build()
			.unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get("/sync"));

		let (held_tx, held_rx) = std::sync::mpsc::channel();
		let (read_tx, read_rx) = std::sync::mpsc::channel();
		let inspector = {
			let job = job.clone();
			std::thread::spawn(move || {
				job.inspect(|_| {
					held_tx.send(()).unwrap();
					std::thread::sleep(Duration::from_millis(100));
					let _ = read_tx.send(job.error());
				});
			})
		};
		held_rx.recv().unwrap();

		let starter = {
			let job = job.clone();
			let handle = runtime.handle().clone();
			std::thread::spawn(move || {
				let _guard = handle.enter();
				job.start()
			})
		};

		assert_eq!(
			read_rx.recv_timeout(Duration::from_secs(5)),
			Ok(ErrorCode::NoError)
		);
		inspector.join().unwrap();
		starter.join().unwrap().unwrap();
		assert_eq!(job.phase(), JobPhase::Running);
		job.abandon();
	}

	#[test]
	fn abandon_while_starting_rejects_the_start() {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
			.unwrap();
		let transport = Arc::new(ScriptedTransport::default());
		let job = Job::new(connection_with(&transport), TestCall::get("/sync"));

		let (held_tx, held_rx) = std::sync::mpsc::channel();
		let (resume_tx, resume_rx) = std::sync::mpsc::channel::<()>();
		let inspector = {
			let job = job.clone();
			std::thread::spawn(move || {
				job.inspect(|_| {
					held_tx.send(()).unwrap();
					resume_rx.recv().unwrap();
				});
			})
		};
		held_rx.recv().unwrap();

		let starter = {
			let job = job.clone();
			let handle = runtime.handle().clone();
			std::thread::spawn(move || {
				let _guard = handle.enter();
				job.start()
			})
		};
		while !job.shared.state.lock().starting {
			std::thread::yield_now();
		}
		job.abandon();
		resume_tx.send(()).unwrap();
		inspector.join().unwrap();

		assert!(matches!(
			starter.join().unwrap(),
			Err(JobError::Terminated {
				phase: JobPhase::Abandoned,
				..
			})
		));
		assert_eq!(transport.count(), 0);
		assert_eq!(job.phase(), JobPhase::Abandoned);
	}

	#[test]
	fn first_recorded_error_wins() {
		let mut state = JobState {
			phase: JobPhase::Running,
			error: ErrorCode::NoError,
			error_text: String::new(),
			starting: false,
			settling: false,
			cancel: None,
			events: None,
		};
		assert!(state.record_error(&CallError::timeout("first")));
		assert!(!state.record_error(&CallError::network("second")));
		assert_eq!(state.error, ErrorCode::TimeoutError);
		assert_eq!(state.error_text, "first");
	}
}
