// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Bidirectional synchronization between the [`LocalStore`] and the remote
//! store.
//!
//! ```text
//!            trigger (manual, tick, online, login)
//!   ┌──────┐ ───────────────────────────────────► ┌─────────┐
//!   │ idle │                                      │ syncing │
//!   └──────┘ ◄──────────── success ────────────── └─────────┘
//!      ▲                                            │     │
//!      │          next trigger            failure   │     │ failure while
//!      └──────────────────────── ┌───────┐ ◄────────┘     │ offline
//!                                │ error │          ┌─────────┐
//!                                └───────┘          │ offline │
//!                                                   └─────────┘
//! ```
//!
//! Only one push or pull runs at a time. A trigger that arrives while one is
//! in flight returns [`SyncOutcome::AlreadyRunning`]; it is not queued.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::SyncClient;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{StoreError, SyncError};
use crate::lock::{ProcessLock, ProcessLockGuard};
use crate::merge::merge_remote;
use crate::model::{Record, RecordId, SyncStatus};
use crate::pending::{ChangeOperation, PendingChange, PendingChangeQueue, TrackOutcome};
use crate::state::SyncStateStore;
use crate::store::LocalStore;
use crate::wire::{PullRequest, PushChange, PushConflict, PushRequest, RemoteChange};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
	#[default]
	Idle,
	Syncing,
	Error,
	Offline,
}

impl SyncState {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::Syncing => "syncing",
			Self::Error => "error",
			Self::Offline => "offline",
		}
	}
}

impl fmt::Display for SyncState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Read-only status for display.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
	pub state: SyncState,
	pub last_error: Option<String>,
	pub pending: usize,
	pub last_sync_at: Option<String>,
	pub online: bool,
	pub authenticated: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
	Offline,
	NotAuthenticated,
	NothingToPush,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome<T> {
	Completed(T),
	Skipped(SkipReason),
	AlreadyRunning,
}

impl<T> SyncOutcome<T> {
	pub fn completed(self) -> Option<T> {
		match self {
			Self::Completed(value) => Some(value),
			_ => None,
		}
	}

	pub fn is_completed(&self) -> bool {
		matches!(self, Self::Completed(_))
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PullSummary {
	pub received: usize,
	pub inserted: usize,
	pub updated: usize,
	pub removed: usize,
	pub kept_local: usize,
	/// Entries the server sent that could not be parsed.
	pub invalid: usize,
	/// Entries dropped by local validation on write.
	pub rejected: usize,
	pub server_time: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PushSummary {
	pub sent: usize,
	pub acknowledged: usize,
	pub marked_synced: usize,
	pub conflicts: Vec<PushConflict>,
	/// The pull run to resolve conflicts, if there were any.
	pub pull: Option<PullSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
	pub push: Option<PushSummary>,
	pub pull: Option<PullSummary>,
}

struct FlightGuard<'a> {
	flag: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
	fn drop(&mut self) {
		self.flag.store(false, Ordering::SeqCst);
	}
}

/// Exclusive hold on the record collection and the pending queue for one
/// read-modify-write cycle. Fields drop in reverse acquisition order.
struct WriteSection<'a> {
	queue: MutexGuard<'a, PendingChangeQueue>,
	_process: ProcessLockGuard,
	_writes: MutexGuard<'a, ()>,
}

pub struct SyncManager {
	store: Arc<LocalStore>,
	client: SyncClient,
	state: SyncStateStore,
	connectivity: ConnectivityMonitor,
	authenticated: AtomicBool,
	queue: Mutex<PendingChangeQueue>,
	/// Serializes read-modify-write cycles on the record collection.
	writes: Mutex<()>,
	process_lock: ProcessLock,
	in_flight: AtomicBool,
	status: watch::Sender<SyncSnapshot>,
	cancel: Mutex<CancellationToken>,
}

impl SyncManager {
	/// Restores the pending queue and cursor from `state`.
	pub async fn new(
		store: Arc<LocalStore>,
		client: SyncClient,
		state: SyncStateStore,
		connectivity: ConnectivityMonitor,
	) -> Result<Self, SyncError> {
		let queue = restore_queue(&state).await?;
		let last_sync_at = state.last_sync_at().await?;
		let online = connectivity.is_online();

		info!(
			pending = queue.len(),
			last_sync_at = ?last_sync_at,
			online,
			"sync manager initialized"
		);

		let (status, _) = watch::channel(SyncSnapshot {
			state: if online { SyncState::Idle } else { SyncState::Offline },
			last_error: None,
			pending: queue.len(),
			last_sync_at,
			online,
			authenticated: false,
		});

		Ok(Self {
			store,
			client,
			state,
			connectivity,
			authenticated: AtomicBool::new(false),
			queue: Mutex::new(queue),
			writes: Mutex::new(()),
			process_lock: ProcessLock::none(),
			in_flight: AtomicBool::new(false),
			status,
			cancel: Mutex::new(CancellationToken::new()),
		})
	}

	/// Shares the store and queue with other processes. Every write then
	/// holds `lock` and re-reads both from storage first.
	pub fn with_process_lock(mut self, lock: ProcessLock) -> Self {
		self.process_lock = lock;
		self
	}

	pub fn store(&self) -> &Arc<LocalStore> {
		&self.store
	}

	pub fn connectivity(&self) -> &ConnectivityMonitor {
		&self.connectivity
	}

	pub fn status(&self) -> SyncSnapshot {
		self.status.borrow().clone()
	}

	pub fn subscribe_status(&self) -> watch::Receiver<SyncSnapshot> {
		self.status.subscribe()
	}

	pub fn is_authenticated(&self) -> bool {
		self.authenticated.load(Ordering::SeqCst)
	}

	pub fn set_authenticated(&self, authenticated: bool) {
		let was = self.authenticated.swap(authenticated, Ordering::SeqCst);
		if was != authenticated {
			info!(authenticated, "authentication changed");
		}
		self.update_status(|_| {});
	}

	/// Reflects a connectivity transition in the state machine.
	pub fn on_connectivity_change(&self, online: bool) {
		self.update_status(|s| match (online, s.state) {
			(false, SyncState::Syncing) => {}
			(false, _) => s.state = SyncState::Offline,
			(true, SyncState::Offline) => s.state = SyncState::Idle,
			(true, _) => {}
		});
	}

	pub async fn pending_count(&self) -> usize {
		self.queue_snapshot().await.len()
	}

	pub async fn pending_changes(&self) -> Vec<PendingChange> {
		self.queue_snapshot().await
	}

	/// Folds a local mutation into the pending queue and persists the queue.
	pub async fn track_change(
		&self,
		operation: ChangeOperation,
		record: &Record,
	) -> Result<TrackOutcome, SyncError> {
		let mut section = self.write_section().await?;
		self.track_in(&mut section, operation, record).await
	}

	/// Stores a new record locally, then queues it for push when signed in.
	pub async fn add_with_sync(&self, record: Record) -> Result<Record, SyncError> {
		let mut record = self.store.schema().sanitize(record).map_err(StoreError::Validation)?;
		record.sync_status = SyncStatus::Pending;

		let mut section = self.write_section().await?;
		let mut records = self.store.load_all().await?;
		records.retain(|r| r.id != record.id);
		records.push(record.clone());
		self.store.save_all(records).await?;

		info!(record_id = %record.id, "added record");
		if self.is_authenticated() {
			self.track_in(&mut section, ChangeOperation::Create, &record).await?;
		}
		Ok(record)
	}

	/// Applies `edit` to the stored record, advances its `updatedAt`, then
	/// queues it for push when signed in.
	pub async fn update_with_sync<F>(&self, id: &RecordId, edit: F) -> Result<Record, SyncError>
	where
		F: FnOnce(&mut Record) + Send,
	{
		let mut section = self.write_section().await?;
		let mut records = self.store.load_all().await?;
		let index = records
			.iter()
			.position(|r| &r.id == id && !r.is_tombstone())
			.ok_or_else(|| StoreError::NotFound(id.to_string()))?;

		let mut record = records[index].clone();
		edit(&mut record);
		record.id = id.clone();
		record.touch();
		let updated = self.store.schema().sanitize(record).map_err(StoreError::Validation)?;

		records[index] = updated.clone();
		self.store.save_all(records).await?;

		info!(record_id = %id, "updated record");
		if self.is_authenticated() {
			self.track_in(&mut section, ChangeOperation::Update, &updated).await?;
		}
		Ok(updated)
	}

	/// Removes the record locally, then queues a delete when signed in.
	pub async fn delete_with_sync(&self, id: &RecordId) -> Result<(), SyncError> {
		let mut section = self.write_section().await?;
		let mut record = self
			.store
			.get(id)
			.await?
			.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
		self.store.delete(id).await?;

		info!(record_id = %id, "deleted record");
		if self.is_authenticated() {
			record.touch();
			record.deleted_at = Some(record.updated_at);
			self.track_in(&mut section, ChangeOperation::Delete, &record).await?;
		}
		Ok(())
	}

	/// Sends the pending batch. When the server reports conflicts, pulls once
	/// so the server's version replaces the local one.
	pub async fn push(&self) -> Result<SyncOutcome<PushSummary>, SyncError> {
		if let Some(reason) = self.gate() {
			return Ok(SyncOutcome::Skipped(reason));
		}
		if self.queue_snapshot().await.is_empty() {
			return Ok(SyncOutcome::Skipped(SkipReason::NothingToPush));
		}
		let Some(_flight) = self.try_begin() else {
			debug!("push requested while sync in flight");
			return Ok(SyncOutcome::AlreadyRunning);
		};

		let token = self.begin().await;
		let result = self.push_inner(&token).await;
		self.finish(&result);
		result.map(SyncOutcome::Completed)
	}

	/// Fetches everything changed since the cursor and merges it.
	pub async fn pull(&self) -> Result<SyncOutcome<PullSummary>, SyncError> {
		if let Some(reason) = self.gate() {
			return Ok(SyncOutcome::Skipped(reason));
		}
		let Some(_flight) = self.try_begin() else {
			debug!("pull requested while sync in flight");
			return Ok(SyncOutcome::AlreadyRunning);
		};

		let token = self.begin().await;
		let result = self.pull_inner(&token).await;
		self.finish(&result);
		result.map(SyncOutcome::Completed)
	}

	/// Push, then pull. A failed push aborts before the pull.
	pub async fn sync(&self) -> Result<SyncOutcome<SyncSummary>, SyncError> {
		if let Some(reason) = self.gate() {
			return Ok(SyncOutcome::Skipped(reason));
		}
		let Some(_flight) = self.try_begin() else {
			debug!("sync requested while sync in flight");
			return Ok(SyncOutcome::AlreadyRunning);
		};

		let token = self.begin().await;
		let result = self.sync_inner(&token).await;
		self.finish(&result);
		result.map(SyncOutcome::Completed)
	}

	/// Aborts in-flight work and forgets the pending queue and cursor.
	/// Local records are kept.
	pub async fn logout(&self) -> Result<(), SyncError> {
		{
			let mut cancel = self.cancel.lock().await;
			cancel.cancel();
			*cancel = CancellationToken::new();
		}
		self.authenticated.store(false, Ordering::SeqCst);

		let dropped = {
			let mut section = self.write_section().await?;
			let dropped = section.queue.len();
			section.queue.clear();
			self.state.clear().await?;
			// Keeps the revision counter so acks from before the logout never match.
			self.state.save_queue(&section.queue).await?;
			dropped
		};

		self.update_status(|s| {
			s.pending = 0;
			s.last_sync_at = None;
			s.last_error = None;
			if s.state != SyncState::Offline {
				s.state = SyncState::Idle;
			}
		});
		info!(dropped, "logged out, sync state cleared");
		Ok(())
	}

	/// Fires a best-effort push of the pending batch without waiting for it
	/// and returns how many changes are still unsynced, so the host can warn
	/// before closing.
	pub async fn prepare_teardown(&self) -> usize {
		let entries = self.queue_snapshot().await;
		let pending = entries.len();
		if pending == 0 {
			return 0;
		}

		if self.connectivity.is_online() && self.is_authenticated() {
			let request = PushRequest {
				changes: entries.iter().map(PushChange::from).collect(),
			};
			self.client.push_beacon(&request);
			info!(count = pending, "sent best-effort push before teardown");
		}

		warn!(count = pending, "unsynced changes at teardown");
		pending
	}

	async fn sync_inner(&self, token: &CancellationToken) -> Result<SyncSummary, SyncError> {
		let has_pending = !self.queue_snapshot().await.is_empty();
		let push = if has_pending {
			Some(self.push_inner(token).await?)
		} else {
			None
		};

		let already_pulled = push.as_ref().is_some_and(|p| p.pull.is_some());
		let pull = if already_pulled {
			None
		} else {
			Some(self.pull_inner(token).await?)
		};

		Ok(SyncSummary { push, pull })
	}

	async fn push_inner(&self, token: &CancellationToken) -> Result<PushSummary, SyncError> {
		let batch = self.write_section().await?.queue.entries.clone();
		if batch.is_empty() {
			return Ok(PushSummary::default());
		}

		let request = PushRequest {
			changes: batch.iter().map(PushChange::from).collect(),
		};
		info!(count = batch.len(), "pushing pending changes");
		let response = cancellable(token, self.client.push(&request)).await?;

		let results = &response.results;
		let applied: HashSet<&str> = results
			.created
			.iter()
			.chain(&results.updated)
			.chain(&results.deleted)
			.map(String::as_str)
			.collect();

		let mut acknowledged = 0;
		let mut confirmed: HashMap<RecordId, DateTime<Utc>> = HashMap::new();
		let marked_synced = {
			let mut section = self.write_section().await?;
			if token.is_cancelled() {
				return Err(SyncError::Cancelled);
			}
			for change in &batch {
				if !applied.contains(change.id.as_str()) {
					continue;
				}
				if !section.queue.acknowledge(&change.id, change.revision) {
					debug!(record_id = %change.id, "change rewritten during push, keeping it queued");
					continue;
				}
				acknowledged += 1;
				if change.operation != ChangeOperation::Delete {
					if let Some(updated_at) = change.payload_updated_at() {
						confirmed.insert(change.id.clone(), updated_at);
					}
				}
			}
			self.state.save_queue(&section.queue).await?;
			let pending = section.queue.len();
			self.update_status(|s| s.pending = pending);
			self.mark_synced(&confirmed).await?
		};
		debug!(
			acknowledged,
			marked_synced,
			server_time = %response.server_time,
			"push acknowledged"
		);

		let conflicts = response.results.conflicts.clone();
		for conflict in &conflicts {
			warn!(
				record_id = %conflict.id,
				reason = %conflict.reason,
				"push conflict, deferring to server"
			);
		}

		let pull = if conflicts.is_empty() {
			None
		} else {
			Some(self.pull_inner(token).await?)
		};

		Ok(PushSummary {
			sent: batch.len(),
			acknowledged,
			marked_synced,
			conflicts,
			pull,
		})
	}

	/// Marks records synced when their stored `updatedAt` is still the one
	/// the server acknowledged. Runs inside a write section.
	async fn mark_synced(
		&self,
		confirmed: &HashMap<RecordId, DateTime<Utc>>,
	) -> Result<usize, SyncError> {
		if confirmed.is_empty() {
			return Ok(0);
		}

		let mut records = self.store.load_all().await?;
		let mut marked = 0;
		for record in records.iter_mut() {
			let acked = confirmed.get(&record.id) == Some(&record.updated_at);
			if acked && record.sync_status == SyncStatus::Pending {
				record.mark_synced();
				marked += 1;
			}
		}

		if marked > 0 {
			self.store.save_all(records).await?;
		}
		Ok(marked)
	}

	async fn pull_inner(&self, token: &CancellationToken) -> Result<PullSummary, SyncError> {
		let cursor = self.state.last_sync_at().await?;
		debug!(last_sync_at = ?cursor, "pulling remote changes");

		let response = cancellable(
			token,
			self.client.pull(&PullRequest {
				last_sync_at: cursor,
			}),
		)
		.await?;

		let received = response.models.len();
		let mut invalid = 0;
		let mut rejected = 0;
		let schema = self.store.schema();
		let changes: Vec<RemoteChange> = response
			.models
			.into_iter()
			.filter_map(|value| match RemoteChange::from_value(value) {
				Ok(RemoteChange::Upsert(record)) => match schema.sanitize(record) {
					Ok(record) => Some(RemoteChange::Upsert(record)),
					Err(rejection) => {
						// The local copy and its pending entry stay as they are.
						warn!(
							record_id = rejection.display_id(),
							errors = ?rejection.errors,
							"server record failed validation, keeping local state"
						);
						rejected += 1;
						None
					}
				},
				Ok(change) => Some(change),
				Err(e) => {
					warn!(error = %e, "skipping malformed record from server");
					invalid += 1;
					None
				}
			})
			.collect();

		let outcome = {
			let mut section = self.write_section().await?;
			let local = self.store.load_all().await?;
			let mut merged = merge_remote(local, changes, &section.queue);

			let mut dropped: HashSet<String> = HashSet::new();
			if merged.changed() {
				let report = self.store.save_all(std::mem::take(&mut merged.records)).await?;
				rejected += report.rejected.len();
				dropped.extend(report.rejected.into_iter().filter_map(|r| r.id));
			}

			let mut superseded = 0;
			for id in merged.superseded.iter().filter(|id| !dropped.contains(id.as_str())) {
				if section.queue.supersede(id) {
					debug!(record_id = %id, "pending change superseded by server state");
					superseded += 1;
				}
			}
			if superseded > 0 {
				self.state.save_queue(&section.queue).await?;
				let pending = section.queue.len();
				self.update_status(|s| s.pending = pending);
			}

			PullSummary {
				received,
				inserted: merged.inserted,
				updated: merged.updated,
				removed: merged.removed,
				kept_local: merged.kept_local,
				invalid,
				rejected,
				server_time: String::new(),
			}
		};

		if token.is_cancelled() {
			return Err(SyncError::Cancelled);
		}

		let server_time = response.server_time;
		self.state.set_last_sync_at(&server_time).await?;
		self.update_status(|s| s.last_sync_at = Some(server_time.clone()));

		info!(
			received,
			inserted = outcome.inserted,
			updated = outcome.updated,
			removed = outcome.removed,
			kept_local = outcome.kept_local,
			invalid,
			rejected = outcome.rejected,
			server_time = %server_time,
			"pull applied"
		);

		Ok(PullSummary {
			server_time,
			..outcome
		})
	}

	/// Takes the write lock, then the process lock, and re-reads records and
	/// queue when other processes may have written since our last look.
	async fn write_section(&self) -> Result<WriteSection<'_>, SyncError> {
		let writes = self.writes.lock().await;
		let process = self.process_lock.acquire().await?;
		let mut queue = self.queue.lock().await;

		if self.process_lock.is_shared() {
			self.store.invalidate_cache();
			*queue = restore_queue(&self.state).await?;
			let pending = queue.len();
			self.update_status(|s| s.pending = pending);
		}

		Ok(WriteSection {
			queue,
			_process: process,
			_writes: writes,
		})
	}

	async fn queue_snapshot(&self) -> Vec<PendingChange> {
		if self.process_lock.is_shared() {
			match self.write_section().await {
				Ok(section) => return section.queue.entries.clone(),
				Err(e) => warn!(error = %e, "failed to re-read pending queue, using cached copy"),
			}
		}
		self.queue.lock().await.entries.clone()
	}

	async fn track_in(
		&self,
		section: &mut WriteSection<'_>,
		operation: ChangeOperation,
		record: &Record,
	) -> Result<TrackOutcome, SyncError> {
		let outcome = section.queue.track(operation, record);
		self.state.save_queue(&section.queue).await?;
		let pending = section.queue.len();

		debug!(
			record_id = %record.id,
			operation = operation.as_str(),
			?outcome,
			pending,
			"tracked local change"
		);
		self.update_status(|s| s.pending = pending);
		Ok(outcome)
	}

	fn gate(&self) -> Option<SkipReason> {
		if !self.connectivity.is_online() {
			self.on_connectivity_change(false);
			return Some(SkipReason::Offline);
		}
		if !self.is_authenticated() {
			return Some(SkipReason::NotAuthenticated);
		}
		None
	}

	fn try_begin(&self) -> Option<FlightGuard<'_>> {
		self
			.in_flight
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.ok()
			.map(|_| FlightGuard {
				flag: &self.in_flight,
			})
	}

	async fn begin(&self) -> CancellationToken {
		let token = self.cancel.lock().await.clone();
		self.transition(SyncState::Syncing, None);
		token
	}

	fn finish<T>(&self, result: &Result<T, SyncError>) {
		match result {
			Ok(_) => self.transition(SyncState::Idle, None),
			Err(SyncError::Cancelled) => {
				debug!("sync cancelled");
				self.transition(SyncState::Idle, None);
			}
			Err(e) => {
				let next = if self.connectivity.is_online() {
					SyncState::Error
				} else {
					SyncState::Offline
				};
				warn!(error = %e, recoverable = e.is_recoverable(), state = %next, "sync failed");
				self.transition(next, Some(e.to_string()));
			}
		}
	}

	fn transition(&self, to: SyncState, error: Option<String>) {
		self.update_status(|s| {
			if s.state != to {
				info!(from = %s.state, to = %to, "sync state changed");
				s.state = to;
			}
			s.last_error = error;
		});
	}

	fn update_status(&self, f: impl FnOnce(&mut SyncSnapshot)) {
		let online = self.connectivity.is_online();
		let authenticated = self.is_authenticated();
		self.status.send_if_modified(|snapshot| {
			let before = snapshot.clone();
			snapshot.online = online;
			snapshot.authenticated = authenticated;
			f(snapshot);
			*snapshot != before
		});
	}
}

async fn restore_queue(state: &SyncStateStore) -> Result<PendingChangeQueue, SyncError> {
	match state.load_queue().await {
		Ok(queue) => Ok(queue),
		Err(StoreError::Serialization(e)) => {
			warn!(error = %e, "pending queue is unreadable, starting empty");
			Ok(PendingChangeQueue::new())
		}
		Err(e) => Err(e.into()),
	}
}

async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, SyncError>
where
	F: Future<Output = Result<T, SyncError>>,
{
	tokio::select! {
		biased;
		_ = token.cancelled() => Err(SyncError::Cancelled),
		result = fut => result,
	}
}
