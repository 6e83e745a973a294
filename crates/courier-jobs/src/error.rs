// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error taxonomy for call jobs.
//!
//! A job's outcome is classified by an [`ErrorCode`] plus free text; the
//! pair travels as a [`CallError`]. [`JobError`] is different: it reports
//! misuse of the job API itself (starting twice, starting outside a
//! runtime) and is returned synchronously to the caller.

use std::fmt;

use thiserror::Error;

use crate::events::JobPhase;

/// Result type alias for job API operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// A namespaced error code for failures specific to one kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserErrorCode {
	pub namespace: &'static str,
	pub code: u32,
}

/// Classification of a job's outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ErrorCode {
	#[default]
	NoError,
	/// The transport failed to deliver any reply.
	NetworkError,
	/// The reply body is not a JSON document.
	JsonParseError,
	/// No reply arrived before the deadline.
	TimeoutError,
	/// A reply arrived but was rejected by the sanity checks.
	ContentAccessError,
	UserDefined(UserErrorCode),
}

impl ErrorCode {
	/// First numeric value of the user-defined range.
	pub const USER_DEFINED_BASE: i32 = 512;

	pub const fn user(namespace: &'static str, code: u32) -> Self {
		Self::UserDefined(UserErrorCode { namespace, code })
	}

	pub fn is_error(&self) -> bool {
		!matches!(self, Self::NoError)
	}

	/// Numeric value compatible with the historical integer codes.
	pub fn as_i32(&self) -> i32 {
		match self {
			Self::NoError => 0,
			Self::NetworkError => 100,
			Self::JsonParseError => 101,
			Self::TimeoutError => 102,
			Self::ContentAccessError => 103,
			Self::UserDefined(user) => {
				Self::USER_DEFINED_BASE.saturating_add(i32::try_from(user.code).unwrap_or(i32::MAX))
			}
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::NoError => f.write_str("no error"),
			Self::NetworkError => f.write_str("network error"),
			Self::JsonParseError => f.write_str("JSON parse error"),
			Self::TimeoutError => f.write_str("timeout"),
			Self::ContentAccessError => f.write_str("content access error"),
			Self::UserDefined(user) => write!(f, "{}:{}", user.namespace, user.code),
		}
	}
}

/// A classified failure of a call.
///
/// There is no constructor for [`ErrorCode::NoError`]: a `CallError` always
/// describes an actual failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct CallError {
	code: ErrorCode,
	message: String,
}

impl CallError {
	pub fn network(message: impl Into<String>) -> Self {
		Self::with_code(ErrorCode::NetworkError, message)
	}

	pub fn json_parse(message: impl Into<String>) -> Self {
		Self::with_code(ErrorCode::JsonParseError, message)
	}

	pub fn timeout(message: impl Into<String>) -> Self {
		Self::with_code(ErrorCode::TimeoutError, message)
	}

	pub fn content_access(message: impl Into<String>) -> Self {
		Self::with_code(ErrorCode::ContentAccessError, message)
	}

	pub fn user(namespace: &'static str, code: u32, message: impl Into<String>) -> Self {
		Self::with_code(ErrorCode::user(namespace, code), message)
	}

	fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	pub fn code(&self) -> ErrorCode {
		self.code
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

/// Misuse of the job API. These indicate a bug in the caller.
#[derive(Debug, Error)]
pub enum JobError {
	#[error("job '{name}' was already started")]
	AlreadyStarted { name: String },

	#[error("job '{name}' has already terminated ({phase})")]
	Terminated { name: String, phase: JobPhase },

	#[error("job '{name}' must be started inside a tokio runtime")]
	NoRuntime { name: String },

	#[error("job '{name}' produced an empty API path")]
	EmptyPath { name: String },

	#[error("base URL {url} cannot carry an API path")]
	InvalidBaseUrl { url: String },
}
