// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use loom_common_http::RetryableError;
use thiserror::Error;

use crate::validation::RejectedRecord;

#[derive(Debug, Error)]
pub enum StoreError {
	/// The storage engine cannot be opened at all. Not retried.
	#[error("store unavailable: {0}")]
	Unavailable(String),

	/// The engine is busy or blocked by another writer.
	#[error("storage busy: {0}")]
	Busy(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("record not found: {0}")]
	NotFound(String),

	#[error("record {} failed validation: {}", .0.display_id(), .0.errors.join("; "))]
	Validation(RejectedRecord),
}

impl RetryableError for StoreError {
	fn is_retryable(&self) -> bool {
		match self {
			Self::Busy(_) => true,
			Self::Io(e) => e.is_retryable(),
			Self::Unavailable(_) | Self::Serialization(_) | Self::NotFound(_) | Self::Validation(_) => {
				false
			}
		}
	}
}

#[derive(Debug, Error)]
pub enum SyncError {
	#[error("network error: {0}")]
	Network(String),

	#[error("authentication failed: {0}")]
	Auth(String),

	#[error("server error: {status} - {message}")]
	Server { status: u16, message: String },

	#[error("invalid response: {0}")]
	InvalidResponse(String),

	#[error("invalid URL: {0}")]
	InvalidUrl(String),

	#[error("sync cancelled")]
	Cancelled,

	#[error("local store error: {0}")]
	Store(#[from] StoreError),
}

impl From<reqwest::Error> for SyncError {
	fn from(e: reqwest::Error) -> Self {
		if e.is_decode() {
			Self::InvalidResponse(e.to_string())
		} else {
			Self::Network(e.to_string())
		}
	}
}

impl From<serde_json::Error> for SyncError {
	fn from(e: serde_json::Error) -> Self {
		Self::InvalidResponse(e.to_string())
	}
}

impl SyncError {
	/// Whether the failure leaves local state untouched and the next trigger
	/// can simply try again.
	pub fn is_recoverable(&self) -> bool {
		!matches!(self, Self::Store(StoreError::Unavailable(_)))
	}
}

#[derive(Debug, Error)]
pub enum ChannelError {
	#[error("channel I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("file watch failed: {0}")]
	Watch(#[from] notify::Error),

	#[error("failed to encode message: {0}")]
	Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },

	#[error("could not determine home directory")]
	HomeDirNotFound,
}

impl ConfigError {
	pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			field: field.into(),
			message: message.into(),
		}
	}
}
