// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Asynchronous remote-call jobs.
//!
//! A [`Job`] performs one HTTP request against a server described by
//! [`ConnectionData`], judges the reply through the hooks of an [`ApiCall`]
//! and reports exactly one outcome: success, or failure classified by an
//! [`ErrorCode`]. A job can also be abandoned, in which case it reports
//! nothing.
//!
//! ```no_run
//! use std::sync::Arc;
//! use courier_jobs::{ApiCall, ConnectionData, HttpVerb, JobPhase, ReqwestTransport};
//!
//! struct Versions;
//!
//! impl ApiCall for Versions {
//! 	fn name(&self) -> &str { "VersionsJob" }
//! 	fn verb(&self) -> HttpVerb { HttpVerb::Get }
//! 	fn api_path(&self) -> String { "/_matrix/client/versions".into() }
//! 	fn needs_token(&self) -> bool { false }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let connection = Arc::new(ConnectionData::new("https://matrix.org".parse()?, transport)?);
//! let job = connection.call_api(Versions)?;
//! assert_eq!(job.finished().await, JobPhase::Succeeded);
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod http_transport;
pub mod job;
pub mod request;
pub mod transport;

#[cfg(test)]
mod testing;

pub use call::{decode_json, default_check_reply, ApiCall};
pub use config::JobConfig;
pub use connection::ConnectionData;
pub use error::{CallError, ErrorCode, JobError, Result, UserErrorCode};
pub use events::{JobEvent, JobId, JobPhase};
pub use http_transport::ReqwestTransport;
pub use job::Job;
pub use request::{HttpVerb, Query, Request, RequestData};
pub use transport::{
	FailureKind, PendingReply, RawReply, ReplySink, TlsChallenge, TlsDecision, TlsWarning,
	Transport, TransportEvent, TransportFailure,
};
