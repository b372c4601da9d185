// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Cross-tab change notification.
//!
//! Sibling tabs (or processes) sharing one durable store tell each other
//! "the collection changed" so they can drop their in-memory caches. The
//! channel is advisory: messages may be lost, duplicated or never delivered,
//! and nothing here is ever allowed to fail the write that triggered it.
//!
//! ```text
//!  tab A                         channel                        tab B
//!  LocalStore::save_all ──► TabNotifier ──(throttled)──► listen loop
//!                                                           │ drop own / dup
//!                                                           ▼
//!                                              LocalStore::invalidate_cache
//!                                              + on_remote_change callback
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ChannelError;

/// Default throttle window for outgoing notifications.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_millis(1000);

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

const NOTICE_FILE: &str = "notice.json";

/// Per-process identity, used only to drop our own echoes. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().simple().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for TabId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabAction {
	Save,
	Delete,
	Clear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
	#[serde(rename = "models-updated")]
	ModelsUpdated,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabMessage {
	#[serde(rename = "type")]
	pub kind: MessageKind,
	pub action: TabAction,
	pub tab_id: TabId,
	/// Milliseconds since the Unix epoch at send time.
	pub timestamp: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub models_count: Option<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model_id: Option<String>,
}

/// What a local mutation wants to tell the other tabs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
	pub action: TabAction,
	pub models_count: Option<usize>,
	pub model_id: Option<String>,
}

impl Notice {
	pub fn saved(count: usize) -> Self {
		Self {
			action: TabAction::Save,
			models_count: Some(count),
			model_id: None,
		}
	}

	pub fn deleted(id: impl Into<String>) -> Self {
		Self {
			action: TabAction::Delete,
			models_count: None,
			model_id: Some(id.into()),
		}
	}

	pub fn cleared() -> Self {
		Self {
			action: TabAction::Clear,
			models_count: None,
			model_id: None,
		}
	}
}

/// Transport for encoded [`TabMessage`]s between tabs.
pub trait TabChannel: Send + Sync {
	fn post(&self, payload: String) -> Result<(), ChannelError>;
	fn subscribe(&self) -> Result<broadcast::Receiver<String>, ChannelError>;
}

/// In-process channel shared by every coordinator holding a clone of it.
#[derive(Clone)]
pub struct LocalTabChannel {
	tx: broadcast::Sender<String>,
}

impl LocalTabChannel {
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
	}

	pub fn with_capacity(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		Self { tx }
	}
}

impl Default for LocalTabChannel {
	fn default() -> Self {
		Self::new()
	}
}

impl TabChannel for LocalTabChannel {
	fn post(&self, payload: String) -> Result<(), ChannelError> {
		// No receivers just means no sibling is listening right now.
		let _ = self.tx.send(payload);
		Ok(())
	}

	fn subscribe(&self) -> Result<broadcast::Receiver<String>, ChannelError> {
		Ok(self.tx.subscribe())
	}
}

/// Channel between processes sharing a data directory.
///
/// `post` atomically replaces a single notice file; subscribers watch the
/// directory and re-read the file on every change. Only the latest message
/// survives, which is all a cache invalidation needs.
pub struct FileTabChannel {
	dir: PathBuf,
	tx: broadcast::Sender<String>,
	watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileTabChannel {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
		Self {
			dir: dir.into(),
			tx,
			watcher: Mutex::new(None),
		}
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn notice_path(&self) -> PathBuf {
		self.dir.join(NOTICE_FILE)
	}

	fn watch(&self) -> Result<RecommendedWatcher, ChannelError> {
		std::fs::create_dir_all(&self.dir)?;

		let tx = self.tx.clone();
		let notice_path = self.notice_path();
		let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
			let event = match event {
				Ok(event) => event,
				Err(e) => {
					warn!(error = %e, "tab channel watch error");
					return;
				}
			};
			if matches!(event.kind, EventKind::Access(_) | EventKind::Remove(_)) {
				return;
			}
			if !event.paths.iter().any(|p| p == &notice_path) {
				return;
			}
			match std::fs::read_to_string(&notice_path) {
				Ok(payload) if !payload.is_empty() => {
					let _ = tx.send(payload);
				}
				Ok(_) => {}
				Err(e) => debug!(error = %e, "notice file vanished before read"),
			}
		})?;
		watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;

		debug!(dir = %self.dir.display(), "watching tab channel directory");
		Ok(watcher)
	}
}

impl TabChannel for FileTabChannel {
	fn post(&self, payload: String) -> Result<(), ChannelError> {
		std::fs::create_dir_all(&self.dir)?;

		let path = self.notice_path();
		let mut tmp_name = path.as_os_str().to_owned();
		tmp_name.push(format!(".{}.tmp", std::process::id()));
		let tmp_path = PathBuf::from(tmp_name);
		std::fs::write(&tmp_path, payload)?;
		std::fs::rename(&tmp_path, &path)?;
		Ok(())
	}

	fn subscribe(&self) -> Result<broadcast::Receiver<String>, ChannelError> {
		let rx = self.tx.subscribe();
		let mut watcher = self
			.watcher
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		if watcher.is_none() {
			*watcher = Some(self.watch()?);
		}
		Ok(rx)
	}
}

/// Callback invoked for every accepted message from a sibling tab.
pub type RemoteChangeCallback = Arc<dyn Fn(TabAction, u64) + Send + Sync>;

/// Implemented by whatever holds a cache that a sibling's write makes stale.
pub trait CacheInvalidator: Send + Sync {
	fn invalidate_cache(&self);
}

struct NotifierInner {
	tab_id: TabId,
	channel: Option<Arc<dyn TabChannel>>,
	window: Duration,
	pending: Mutex<Option<Notice>>,
	timer_armed: AtomicBool,
}

impl NotifierInner {
	fn send(&self, notice: Notice) {
		let Some(channel) = &self.channel else {
			return;
		};

		let message = TabMessage {
			kind: MessageKind::ModelsUpdated,
			action: notice.action,
			tab_id: self.tab_id.clone(),
			timestamp: Utc::now().timestamp_millis().max(0) as u64,
			models_count: notice.models_count,
			model_id: notice.model_id,
		};

		let result = serde_json::to_string(&message)
			.map_err(ChannelError::from)
			.and_then(|payload| channel.post(payload));

		match result {
			Ok(()) => debug!(
				tab_id = %self.tab_id,
				action = ?message.action,
				timestamp = message.timestamp,
				"broadcast models-updated"
			),
			Err(e) => warn!(error = %e, "cross-tab notification failed"),
		}
	}

	fn take_pending(&self) -> Option<Notice> {
		self
			.pending
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.take()
	}
}

/// Sending half of the coordinator, handed to the local store.
///
/// Trailing-edge throttle: the first `notify` in a quiet period arms a timer
/// for one window; later calls inside that window only replace the payload.
/// The timer is never pushed back, so a steady stream of edits still gets a
/// message out once per window.
#[derive(Clone)]
pub struct TabNotifier {
	inner: Arc<NotifierInner>,
}

impl TabNotifier {
	pub fn notify(&self, notice: Notice) {
		if self.inner.channel.is_none() {
			return;
		}

		*self
			.inner
			.pending
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(notice);

		if self.inner.timer_armed.swap(true, Ordering::SeqCst) {
			return;
		}

		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			// No runtime to host the timer; deliver immediately instead.
			self.inner.timer_armed.store(false, Ordering::SeqCst);
			self.flush();
			return;
		};

		let inner = Arc::clone(&self.inner);
		handle.spawn(async move {
			tokio::time::sleep(inner.window).await;
			// Disarm before taking so a notify racing with us re-arms a timer.
			inner.timer_armed.store(false, Ordering::SeqCst);
			if let Some(notice) = inner.take_pending() {
				inner.send(notice);
			}
		});
	}

	/// Sends any throttled notice right away.
	pub fn flush(&self) {
		if let Some(notice) = self.inner.take_pending() {
			self.inner.send(notice);
		}
	}

	pub fn tab_id(&self) -> &TabId {
		&self.inner.tab_id
	}
}

/// Receive-side filter: drops our own echoes and exact replays.
#[derive(Debug)]
pub struct MessageFilter {
	own: TabId,
	last_processed: Option<(TabId, u64)>,
}

impl MessageFilter {
	pub fn new(own: TabId) -> Self {
		Self {
			own,
			last_processed: None,
		}
	}

	pub fn accept(&mut self, message: &TabMessage) -> bool {
		if message.tab_id == self.own {
			return false;
		}

		let key = (message.tab_id.clone(), message.timestamp);
		if self.last_processed.as_ref() == Some(&key) {
			return false;
		}

		self.last_processed = Some(key);
		true
	}
}

pub struct TabCoordinator {
	tab_id: TabId,
	channel: Option<Arc<dyn TabChannel>>,
	notifier: TabNotifier,
}

impl TabCoordinator {
	pub fn new(channel: Option<Arc<dyn TabChannel>>, window: Duration) -> Self {
		let tab_id = TabId::generate();

		if channel.is_none() {
			info!(tab_id = %tab_id, "no broadcast channel, running in single-tab mode");
		}

		let notifier = TabNotifier {
			inner: Arc::new(NotifierInner {
				tab_id: tab_id.clone(),
				channel: channel.clone(),
				window,
				pending: Mutex::new(None),
				timer_armed: AtomicBool::new(false),
			}),
		};

		Self {
			tab_id,
			channel,
			notifier,
		}
	}

	pub fn single_tab() -> Self {
		Self::new(None, DEFAULT_THROTTLE_WINDOW)
	}

	pub fn tab_id(&self) -> &TabId {
		&self.tab_id
	}

	pub fn is_single_tab(&self) -> bool {
		self.channel.is_none()
	}

	pub fn notifier(&self) -> TabNotifier {
		self.notifier.clone()
	}

	/// Starts the receive loop. Returns `None` in single-tab mode or when the
	/// channel refuses a subscription.
	pub fn listen(
		&self,
		target: Arc<dyn CacheInvalidator>,
		on_remote_change: Option<RemoteChangeCallback>,
	) -> Option<JoinHandle<()>> {
		let channel = self.channel.as_ref()?;
		let mut rx = match channel.subscribe() {
			Ok(rx) => rx,
			Err(e) => {
				warn!(error = %e, "cannot subscribe to broadcast channel, single-tab mode");
				return None;
			}
		};

		let mut filter = MessageFilter::new(self.tab_id.clone());
		let tab_id = self.tab_id.clone();

		Some(tokio::spawn(async move {
			loop {
				match rx.recv().await {
					Ok(payload) => {
						let message: TabMessage = match serde_json::from_str(&payload) {
							Ok(message) => message,
							Err(e) => {
								debug!(error = %e, "ignoring malformed broadcast message");
								continue;
							}
						};

						if !filter.accept(&message) {
							continue;
						}

						debug!(
							tab_id = %tab_id,
							from = %message.tab_id,
							action = ?message.action,
							timestamp = message.timestamp,
							"sibling tab changed the collection"
						);

						target.invalidate_cache();
						if let Some(callback) = &on_remote_change {
							callback(message.action, message.timestamp);
						}
					}
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!(skipped, "broadcast receiver lagged, invalidating cache");
						target.invalidate_cache();
					}
					Err(broadcast::error::RecvError::Closed) => {
						debug!(tab_id = %tab_id, "broadcast channel closed");
						break;
					}
				}
			}
		}))
	}
}
