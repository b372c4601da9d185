// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Advisory lock serializing read-modify-write cycles across processes that
//! share one data directory.
//!
//! Holding the lock means the on-disk records and pending queue are ours to
//! re-read, change and write back. Without it, two processes would each
//! write back their own in-memory copy and the last writer would win.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::StoreError;

#[derive(Clone, Debug, Default)]
pub struct ProcessLock {
	path: Option<PathBuf>,
}

impl ProcessLock {
	/// No cross-process coordination. For stores nothing else can open.
	pub fn none() -> Self {
		Self { path: None }
	}

	/// Exclusive `flock` on `path`, created on first use.
	pub fn file(path: impl Into<PathBuf>) -> Self {
		Self {
			path: Some(path.into()),
		}
	}

	/// Whether other processes may change the shared state between two of our
	/// critical sections, so cached copies must be re-read.
	pub fn is_shared(&self) -> bool {
		self.path.is_some()
	}

	pub fn path(&self) -> Option<&Path> {
		self.path.as_deref()
	}

	/// Blocks (off the async runtime) until the lock is held.
	pub async fn acquire(&self) -> Result<ProcessLockGuard, StoreError> {
		let Some(path) = self.path.clone() else {
			return Ok(ProcessLockGuard { file: None });
		};

		let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
			if let Some(parent) = path.parent() {
				std::fs::create_dir_all(parent)?;
			}
			let file = OpenOptions::new()
				.read(true)
				.write(true)
				.create(true)
				.truncate(false)
				.open(&path)?;
			file.lock_exclusive()?;
			Ok(file)
		})
		.await
		.map_err(|e| StoreError::Busy(format!("lock task failed: {e}")))??;

		debug!("acquired data directory lock");
		Ok(ProcessLockGuard { file: Some(file) })
	}
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct ProcessLockGuard {
	file: Option<File>,
}

impl Drop for ProcessLockGuard {
	fn drop(&mut self) {
		if let Some(file) = &self.file {
			if let Err(e) = FileExt::unlock(file) {
				warn!(error = %e, "failed to release data directory lock");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Arc;
	use std::time::Duration;
	use tempfile::TempDir;

	#[tokio::test]
	async fn none_is_not_shared_and_never_blocks() {
		let lock = ProcessLock::none();
		assert!(!lock.is_shared());
		let _a = lock.acquire().await.unwrap();
		let _b = lock.acquire().await.unwrap();
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn second_holder_waits_for_release() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("nested").join("records.lock");
		let first = ProcessLock::file(&path);
		let second = ProcessLock::file(&path);
		assert!(first.is_shared());

		let guard = first.acquire().await.unwrap();
		let acquired = Arc::new(AtomicBool::new(false));
		let waiter = {
			let acquired = Arc::clone(&acquired);
			tokio::spawn(async move {
				let _guard = second.acquire().await.unwrap();
				acquired.store(true, Ordering::SeqCst);
			})
		};

		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(!acquired.load(Ordering::SeqCst));

		drop(guard);
		tokio::time::timeout(Duration::from_secs(5), waiter)
			.await
			.unwrap()
			.unwrap();
		assert!(acquired.load(Ordering::SeqCst));
	}
}
