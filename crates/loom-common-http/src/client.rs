// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP client with consistent User-Agent header.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

/// Creates a new HTTP client builder with the standard sync User-Agent header.
///
/// Use this when you need to customize the client (e.g., set timeout).
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Creates a new HTTP client with a request timeout and the standard User-Agent.
///
/// The sync engine has no deadline of its own; this timeout is the only bound
/// on a hung push or pull.
pub fn new_client_with_timeout(timeout: Duration) -> Result<Client, reqwest::Error> {
	builder().timeout(timeout).build()
}

/// Returns the User-Agent string.
///
/// Format: `loom-sync/{version} ({os}-{arch})`
pub fn user_agent() -> String {
	format!(
		"loom-sync/{} ({}-{})",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}
