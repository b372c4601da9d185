// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for Loom sync.
//!
//! This crate provides:
//! - A pre-configured HTTP client with a consistent User-Agent header
//! - A generic retry combinator with exponential backoff, used for any
//!   boundary that can fail transiently (HTTP, local storage engines)

mod client;
mod retry;

pub use client::{builder, new_client_with_timeout, user_agent};
pub use retry::{retry, RetryConfig, RetryableError};
