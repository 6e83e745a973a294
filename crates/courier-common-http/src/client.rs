// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Client builder used by every Courier transport.

use reqwest::{Client, ClientBuilder};

/// Client builder carrying the Courier User-Agent.
///
/// No request timeout is set; call jobs enforce their own deadlines.
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Returns the standard Courier User-Agent string.
///
/// Format: `courier/{version} ({os}-{arch})`
pub fn user_agent() -> String {
	format!(
		"courier/{} ({}-{})",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}
