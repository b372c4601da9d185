// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Persisted sync state kept outside the record collection: the pending
//! change queue and the `lastSyncAt` watermark.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::pending::PendingChangeQueue;

pub const LAST_SYNC_KEY: &str = "loom-sync.last-sync-at";
pub const PENDING_CHANGES_KEY: &str = "loom-sync.pending-changes";

/// Small string key-value store for state that must survive a restart.
#[async_trait]
pub trait StateStorage: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
	async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One file per key under a state directory, written via temp file + rename.
pub struct FileStateStorage {
	dir: PathBuf,
}

impl FileStateStorage {
	pub fn new(dir: PathBuf) -> Self {
		Self { dir }
	}

	pub fn from_xdg() -> Result<Self, StoreError> {
		let state_dir = dirs::state_dir()
			.or_else(|| dirs::data_dir().map(|d| d.join("state")))
			.ok_or_else(|| {
				StoreError::Unavailable("could not determine XDG state directory".to_string())
			})?;

		let dir = state_dir.join("loom").join("sync");
		info!(dir = %dir.display(), "using sync state directory");
		Ok(Self::new(dir))
	}

	fn key_path(&self, key: &str) -> PathBuf {
		let file: String = key
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
			.collect();
		self.dir.join(file)
	}
}

#[async_trait]
impl StateStorage for FileStateStorage {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		match tokio::fs::read_to_string(self.key_path(key)).await {
			Ok(value) => Ok(Some(value)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StoreError::Io(e)),
		}
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		tokio::fs::create_dir_all(&self.dir).await?;

		let path = self.key_path(key);
		let mut tmp_name = path.as_os_str().to_owned();
		tmp_name.push(format!(".{}.tmp", std::process::id()));
		let tmp_path = PathBuf::from(tmp_name);
		tokio::fs::write(&tmp_path, value).await?;
		tokio::fs::rename(&tmp_path, &path).await?;
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), StoreError> {
		match tokio::fs::remove_file(self.key_path(key)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::Io(e)),
		}
	}
}

#[derive(Default)]
pub struct MemoryStateStorage {
	values: Mutex<HashMap<String, String>>,
}

impl MemoryStateStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StateStorage for MemoryStateStorage {
	async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.values.lock().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
		self
			.values
			.lock()
			.await
			.insert(key.to_string(), value.to_string());
		Ok(())
	}

	async fn remove(&self, key: &str) -> Result<(), StoreError> {
		self.values.lock().await.remove(key);
		Ok(())
	}
}

/// Typed access to the queue and cursor on top of a [`StateStorage`].
pub struct SyncStateStore {
	storage: Box<dyn StateStorage>,
}

impl SyncStateStore {
	pub fn new(storage: impl StateStorage + 'static) -> Self {
		Self {
			storage: Box::new(storage),
		}
	}

	pub fn in_memory() -> Self {
		Self::new(MemoryStateStorage::new())
	}

	pub async fn load_queue(&self) -> Result<PendingChangeQueue, StoreError> {
		let Some(raw) = self.storage.get(PENDING_CHANGES_KEY).await? else {
			debug!("no persisted pending queue, starting empty");
			return Ok(PendingChangeQueue::new());
		};

		match serde_json::from_str::<PendingChangeQueue>(&raw) {
			Ok(queue) => {
				debug!(count = queue.len(), "loaded pending queue");
				Ok(queue)
			}
			Err(e) => Err(StoreError::Serialization(e)),
		}
	}

	pub async fn save_queue(&self, queue: &PendingChangeQueue) -> Result<(), StoreError> {
		let json = serde_json::to_string(queue)?;
		self.storage.set(PENDING_CHANGES_KEY, &json).await?;
		debug!(count = queue.len(), "saved pending queue");
		Ok(())
	}

	pub async fn last_sync_at(&self) -> Result<Option<String>, StoreError> {
		Ok(self
			.storage
			.get(LAST_SYNC_KEY)
			.await?
			.map(|s| s.trim().to_string())
			.filter(|s| !s.is_empty()))
	}

	pub async fn set_last_sync_at(&self, server_time: &str) -> Result<(), StoreError> {
		self.storage.set(LAST_SYNC_KEY, server_time).await
	}

	/// Forgets both the queue and the cursor. Used on logout.
	pub async fn clear(&self) -> Result<(), StoreError> {
		let queue = self.storage.remove(PENDING_CHANGES_KEY).await;
		let cursor = self.storage.remove(LAST_SYNC_KEY).await;

		if let Err(e) = &queue {
			warn!(error = %e, "failed to clear pending queue");
		}
		queue?;
		cursor?;
		info!("cleared sync state");
		Ok(())
	}
}
