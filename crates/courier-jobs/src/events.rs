// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::error::CallError;

/// Unique identifier of a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Lifecycle phase of a job.
///
/// `Created -> Running -> {Succeeded | Failed}`, or `Abandoned` from
/// `Created` or `Running`. Terminal phases are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
	Created,
	Running,
	Succeeded,
	Failed,
	Abandoned,
}

impl JobPhase {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Succeeded | Self::Failed | Self::Abandoned)
	}
}

impl fmt::Display for JobPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Created => "created",
			Self::Running => "running",
			Self::Succeeded => "succeeded",
			Self::Failed => "failed",
			Self::Abandoned => "abandoned",
		};
		f.write_str(s)
	}
}

/// Notifications broadcast by a job.
///
/// A completed job emits `Finished`, `Result`, then exactly one of
/// `Success` or `Failure`. An abandoned job emits nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
	Finished(JobId),
	Result(JobId),
	Success(JobId),
	Failure { job: JobId, error: CallError },
	RetryScheduled {
		job: JobId,
		next_attempt: u32,
		delay: Duration,
	},
}

impl JobEvent {
	pub fn job(&self) -> JobId {
		match self {
			Self::Finished(job) | Self::Result(job) | Self::Success(job) => *job,
			Self::Failure { job, .. } | Self::RetryScheduled { job, .. } => *job,
		}
	}
}
