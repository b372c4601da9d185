// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Durable storage engines for the record collection.
//!
//! An engine is a dumb transactional container: it knows nothing about
//! caching, validation or retries. [`crate::store::LocalStore`] layers those
//! on top.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{Record, RecordId};

#[async_trait]
pub trait StorageEngine: Send + Sync {
	/// Opens (or creates) the underlying store. Called before the first read.
	async fn open(&self) -> Result<(), StoreError>;

	/// Every record, tombstones included.
	async fn read_all(&self) -> Result<Vec<Record>, StoreError>;

	/// Atomically replaces the whole collection. Readers observe either the
	/// previous collection or the new one, never a mix.
	async fn replace_all(&self, records: &[Record]) -> Result<(), StoreError>;

	async fn delete(&self, id: &RecordId) -> Result<(), StoreError>;

	async fn clear(&self) -> Result<(), StoreError>;
}

/// Stores the collection as one JSON document, swapped in with an atomic rename.
pub struct FileEngine {
	dir: PathBuf,
	path: PathBuf,
	write_lock: Mutex<()>,
}

impl FileEngine {
	pub fn new(dir: PathBuf) -> Self {
		let path = dir.join("records.json");
		Self {
			dir,
			path,
			write_lock: Mutex::new(()),
		}
	}

	pub fn from_xdg() -> Result<Self, StoreError> {
		let data_dir = dirs::data_dir().ok_or_else(|| {
			StoreError::Unavailable("could not determine XDG data directory".to_string())
		})?;

		Ok(Self::new(data_dir.join("loom").join("sync")))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn read_file(&self) -> Result<Vec<Record>, StoreError> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
			Ok(contents) => Ok(serde_json::from_str(&contents)?),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
			Err(e) => Err(StoreError::Io(e)),
		}
	}

	async fn write_file(&self, records: &[Record]) -> Result<(), StoreError> {
		let json = serde_json::to_string_pretty(records)?;
		// Per-process temp name so two processes never interleave writes to it.
		let tmp_path = self
			.dir
			.join(format!("records.json.{}.tmp", std::process::id()));

		tokio::fs::write(&tmp_path, &json).await?;
		tokio::fs::rename(&tmp_path, &self.path).await?;

		debug!(
			path = %self.path.display(),
			count = records.len(),
			"wrote record collection"
		);

		Ok(())
	}
}

#[async_trait]
impl StorageEngine for FileEngine {
	async fn open(&self) -> Result<(), StoreError> {
		match tokio::fs::create_dir_all(&self.dir).await {
			Ok(()) => {
				info!(dir = %self.dir.display(), "opened file storage engine");
				Ok(())
			}
			Err(e) if loom_common_http::RetryableError::is_retryable(&e) => Err(StoreError::Io(e)),
			Err(e) => Err(StoreError::Unavailable(format!(
				"cannot create {}: {e}",
				self.dir.display()
			))),
		}
	}

	async fn read_all(&self) -> Result<Vec<Record>, StoreError> {
		self.read_file().await
	}

	async fn replace_all(&self, records: &[Record]) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		self.write_file(records).await
	}

	async fn delete(&self, id: &RecordId) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		let mut records = self.read_file().await?;
		let before = records.len();
		records.retain(|r| &r.id != id);

		if records.len() != before {
			self.write_file(&records).await?;
		}
		Ok(())
	}

	async fn clear(&self) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock().await;
		self.write_file(&[]).await
	}
}

/// Process-local engine. Useful for tests and for hosts without a disk.
#[derive(Default)]
pub struct MemoryEngine {
	records: Mutex<Vec<Record>>,
	disabled: bool,
}

impl MemoryEngine {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_records(records: Vec<Record>) -> Self {
		Self {
			records: Mutex::new(records),
			disabled: false,
		}
	}

	/// An engine whose `open` always fails, like a browser with storage disabled.
	pub fn disabled() -> Self {
		Self {
			records: Mutex::new(Vec::new()),
			disabled: true,
		}
	}
}

#[async_trait]
impl StorageEngine for MemoryEngine {
	async fn open(&self) -> Result<(), StoreError> {
		if self.disabled {
			return Err(StoreError::Unavailable("storage disabled".to_string()));
		}
		Ok(())
	}

	async fn read_all(&self) -> Result<Vec<Record>, StoreError> {
		Ok(self.records.lock().await.clone())
	}

	async fn replace_all(&self, records: &[Record]) -> Result<(), StoreError> {
		*self.records.lock().await = records.to_vec();
		Ok(())
	}

	async fn delete(&self, id: &RecordId) -> Result<(), StoreError> {
		self.records.lock().await.retain(|r| &r.id != id);
		Ok(())
	}

	async fn clear(&self) -> Result<(), StoreError> {
		self.records.lock().await.clear();
		Ok(())
	}
}
