// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Engine configuration.
//!
//! Precedence (highest first): CLI flags, `LOOM_SYNC_*` environment
//! variables, the TOML file, built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use loom_common_http::RetryConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::validation::RecordSchema;

pub const ENV_SERVER_URL: &str = "LOOM_SYNC_SERVER_URL";
pub const ENV_DATA_DIR: &str = "LOOM_SYNC_DATA_DIR";
pub const ENV_INTERVAL_SECS: &str = "LOOM_SYNC_INTERVAL_SECS";
pub const ENV_LOG_LEVEL: &str = "LOOM_SYNC_LOG_LEVEL";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageRetryConfig {
	pub max_attempts: u32,
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
	pub jitter: bool,
}

impl Default for StorageRetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay_ms: 100,
			max_delay_ms: 2000,
			jitter: true,
		}
	}
}

impl From<&StorageRetryConfig> for RetryConfig {
	fn from(cfg: &StorageRetryConfig) -> Self {
		RetryConfig {
			max_attempts: cfg.max_attempts,
			base_delay: Duration::from_millis(cfg.base_delay_ms),
			max_delay: Duration::from_millis(cfg.max_delay_ms),
			jitter: cfg.jitter,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	/// Base URL of the sync API, e.g. `https://loom.example.com/api/`.
	pub server_url: Option<String>,
	/// Where records and sync state live. Defaults to the XDG data dir.
	pub data_dir: Option<PathBuf>,
	pub sync_interval_secs: u64,
	pub throttle_window_ms: u64,
	pub request_timeout_secs: u64,
	pub probe_interval_secs: u64,
	pub log_level: String,
	pub storage_retry: StorageRetryConfig,
	pub schema: RecordSchema,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			server_url: None,
			data_dir: None,
			sync_interval_secs: 30,
			throttle_window_ms: 1000,
			request_timeout_secs: 30,
			probe_interval_secs: 10,
			log_level: "info".to_string(),
			storage_retry: StorageRetryConfig::default(),
			schema: RecordSchema::default(),
		}
	}
}

impl SyncConfig {
	/// `~/.config/loom/sync.toml`, honoring `XDG_CONFIG_HOME`.
	pub fn default_path() -> Result<PathBuf, ConfigError> {
		let config_home = match std::env::var_os("XDG_CONFIG_HOME") {
			Some(dir) => PathBuf::from(dir),
			None => dirs::home_dir()
				.ok_or(ConfigError::HomeDirNotFound)?
				.join(".config"),
		};
		Ok(config_home.join("loom").join("sync.toml"))
	}

	/// Reads `path`. A missing file yields the defaults.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = match std::fs::read_to_string(path) {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %path.display(), "no config file, using defaults");
				return Ok(Self::default());
			}
			Err(e) => return Err(ConfigError::Io(e)),
		};

		let config: Self = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source,
		})?;
		debug!(path = %path.display(), "loaded config file");
		Ok(config)
	}

	/// File (explicit or default path) plus environment overrides, validated.
	pub fn resolve(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
		let path = match explicit_path {
			Some(path) => path.to_path_buf(),
			None => Self::default_path()?,
		};
		let mut config = Self::load(&path)?;
		config.apply_env_overrides(|key| std::env::var(key).ok())?;
		config.validate()?;
		Ok(config)
	}

	pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(url) = lookup(ENV_SERVER_URL).filter(|s| !s.trim().is_empty()) {
			self.server_url = Some(url);
		}
		if let Some(dir) = lookup(ENV_DATA_DIR).filter(|s| !s.trim().is_empty()) {
			self.data_dir = Some(PathBuf::from(dir));
		}
		if let Some(raw) = lookup(ENV_INTERVAL_SECS) {
			self.sync_interval_secs = raw
				.trim()
				.parse()
				.map_err(|e| ConfigError::invalid_value(ENV_INTERVAL_SECS, format!("{e}")))?;
		}
		if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|s| !s.trim().is_empty()) {
			self.log_level = level;
		}
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.sync_interval_secs == 0 {
			return Err(ConfigError::invalid_value(
				"sync_interval_secs",
				"must be greater than zero",
			));
		}
		if self.probe_interval_secs == 0 {
			return Err(ConfigError::invalid_value(
				"probe_interval_secs",
				"must be greater than zero",
			));
		}
		if self.storage_retry.max_attempts == 0 {
			return Err(ConfigError::invalid_value(
				"storage_retry.max_attempts",
				"must be at least 1",
			));
		}
		if let Some(url) = &self.server_url {
			url::Url::parse(url)
				.map_err(|e| ConfigError::invalid_value("server_url", e.to_string()))?;
		}
		Ok(())
	}

	pub fn sync_interval(&self) -> Duration {
		Duration::from_secs(self.sync_interval_secs)
	}

	pub fn throttle_window(&self) -> Duration {
		Duration::from_millis(self.throttle_window_ms)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub fn probe_interval(&self) -> Duration {
		Duration::from_secs(self.probe_interval_secs)
	}

	pub fn storage_retry(&self) -> RetryConfig {
		RetryConfig::from(&self.storage_retry)
	}
}
