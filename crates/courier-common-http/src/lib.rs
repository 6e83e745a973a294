// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Courier.
//!
//! This crate provides:
//! - A pre-configured HTTP client builder with a consistent User-Agent header
//! - The retry policy (exponential backoff with jitter) used by call jobs

mod client;
mod retry;

pub use client::{builder, user_agent};
pub use retry::{RetryConfig, RetryableError};
