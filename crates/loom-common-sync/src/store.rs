// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use loom_common_http::RetryConfig;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::engine::StorageEngine;
use crate::error::StoreError;
use crate::model::{Record, RecordId};
use crate::tabs::{CacheInvalidator, Notice, TabNotifier};
use crate::validation::{RecordSchema, SaveReport};

struct CacheEntry {
	generation: u64,
	records: Arc<Vec<Record>>,
}

/// Durable CRUD over the record collection.
///
/// Reads are served from an in-memory snapshot after the first load. Any
/// write, and any hint from a sibling tab, bumps `generation`; a snapshot
/// taken under an older generation is never served.
pub struct LocalStore {
	engine: Arc<dyn StorageEngine>,
	schema: RecordSchema,
	retry: RetryConfig,
	opened: OnceCell<()>,
	cache: RwLock<Option<CacheEntry>>,
	generation: AtomicU64,
	notifier: Option<TabNotifier>,
}

impl LocalStore {
	pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
		Self {
			engine,
			schema: RecordSchema::default(),
			retry: RetryConfig::storage(),
			opened: OnceCell::new(),
			cache: RwLock::new(None),
			generation: AtomicU64::new(0),
			notifier: None,
		}
	}

	pub fn with_schema(mut self, schema: RecordSchema) -> Self {
		self.schema = schema;
		self
	}

	pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;
		self
	}

	pub fn with_notifier(mut self, notifier: TabNotifier) -> Self {
		self.notifier = Some(notifier);
		self
	}

	pub fn schema(&self) -> &RecordSchema {
		&self.schema
	}

	async fn ensure_open(&self) -> Result<(), StoreError> {
		self
			.opened
			.get_or_try_init(|| async {
				loom_common_http::retry(&self.retry, || self.engine.open()).await?;
				debug!("storage engine opened");
				Ok::<(), StoreError>(())
			})
			.await
			.map(|_| ())
	}

	/// Every stored record, tombstones included.
	pub async fn load_all(&self) -> Result<Vec<Record>, StoreError> {
		let generation = self.generation.load(Ordering::SeqCst);

		if let Some(entry) = self.cache.read().await.as_ref() {
			if entry.generation == generation {
				return Ok(entry.records.as_ref().clone());
			}
		}

		self.ensure_open().await?;
		let records = loom_common_http::retry(&self.retry, || self.engine.read_all()).await?;

		debug!(count = records.len(), generation, "loaded records from storage");

		let mut cache = self.cache.write().await;
		if self.generation.load(Ordering::SeqCst) == generation {
			*cache = Some(CacheEntry {
				generation,
				records: Arc::new(records.clone()),
			});
		}

		Ok(records)
	}

	pub async fn get(&self, id: &RecordId) -> Result<Option<Record>, StoreError> {
		Ok(self.load_all().await?.into_iter().find(|r| &r.id == id))
	}

	/// Replaces the whole collection with the valid subset of `records`.
	///
	/// Invalid records are dropped and reported; the rest commit in one
	/// transaction. When the same id appears twice, the later entry wins.
	pub async fn save_all(&self, records: Vec<Record>) -> Result<SaveReport, StoreError> {
		let (accepted, rejected) = self.schema.partition(dedupe_by_id(records));

		for rejection in &rejected {
			warn!(
				record_id = rejection.display_id(),
				errors = ?rejection.errors,
				"record rejected by validation"
			);
		}

		self.ensure_open().await?;
		self.invalidate_cache();
		loom_common_http::retry(&self.retry, || self.engine.replace_all(&accepted)).await?;

		let count = accepted.len();
		{
			let mut cache = self.cache.write().await;
			*cache = Some(CacheEntry {
				generation: self.generation.load(Ordering::SeqCst),
				records: Arc::new(accepted),
			});
		}

		debug!(accepted = count, rejected = rejected.len(), "saved records");
		self.broadcast(Notice::saved(count));

		Ok(SaveReport {
			accepted: count,
			rejected,
		})
	}

	pub async fn delete(&self, id: &RecordId) -> Result<(), StoreError> {
		self.ensure_open().await?;
		loom_common_http::retry(&self.retry, || self.engine.delete(id)).await?;
		self.invalidate_cache();

		debug!(record_id = %id, "deleted record");
		self.broadcast(Notice::deleted(id.as_str()));
		Ok(())
	}

	pub async fn clear(&self) -> Result<(), StoreError> {
		self.ensure_open().await?;
		loom_common_http::retry(&self.retry, || self.engine.clear()).await?;
		self.invalidate_cache();

		info!("cleared record store");
		self.broadcast(Notice::cleared());
		Ok(())
	}

	/// Forces the next `load_all` to read from storage.
	pub fn invalidate_cache(&self) {
		self.generation.fetch_add(1, Ordering::SeqCst);
	}

	fn broadcast(&self, notice: Notice) {
		if let Some(notifier) = &self.notifier {
			notifier.notify(notice);
		}
	}
}

impl CacheInvalidator for LocalStore {
	fn invalidate_cache(&self) {
		LocalStore::invalidate_cache(self);
	}
}

fn dedupe_by_id(records: Vec<Record>) -> Vec<Record> {
	let mut last_index: HashMap<RecordId, usize> = HashMap::with_capacity(records.len());
	for (i, record) in records.iter().enumerate() {
		last_index.insert(record.id.clone(), i);
	}

	records
		.into_iter()
		.enumerate()
		.filter(|(i, record)| last_index.get(&record.id) == Some(i))
		.map(|(_, record)| record)
		.collect()
}
