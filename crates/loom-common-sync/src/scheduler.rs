// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::manager::{SyncManager, SyncOutcome};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Drives a [`SyncManager`] from timers and signals:
///
/// - every `interval`, a full sync when there is pending work
/// - on reconnect, a full sync when there is pending work
/// - when authentication is established, a pull
pub struct SyncScheduler {
	manager: Arc<SyncManager>,
	interval: Duration,
	shutdown_tx: broadcast::Sender<()>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
	pub fn new(manager: Arc<SyncManager>, interval: Duration) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			manager,
			interval,
			shutdown_tx,
			handle: Mutex::new(None),
		}
	}

	pub async fn start(&self) {
		let mut handle = self.handle.lock().await;
		if handle.is_some() {
			debug!("sync scheduler already running");
			return;
		}

		let manager = Arc::clone(&self.manager);
		let interval = self.interval;
		let shutdown_rx = self.shutdown_tx.subscribe();
		*handle = Some(tokio::spawn(run_loop(manager, interval, shutdown_rx)));

		info!(interval_secs = interval.as_secs(), "sync scheduler started");
	}

	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());
		if let Some(handle) = self.handle.lock().await.take() {
			if let Err(e) = handle.await {
				warn!(error = %e, "sync scheduler task failed");
			}
		}
		info!("sync scheduler stopped");
	}
}

async fn run_loop(
	manager: Arc<SyncManager>,
	interval: Duration,
	mut shutdown_rx: broadcast::Receiver<()>,
) {
	let mut online_rx = manager.connectivity().subscribe();
	let mut status_rx = manager.subscribe_status();
	let mut authenticated = status_rx.borrow_and_update().authenticated;

	let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	if authenticated {
		report("bootstrap pull", manager.pull().await);
	}

	loop {
		tokio::select! {
			_ = shutdown_rx.recv() => {
				debug!("sync scheduler shutting down");
				break;
			}
			_ = ticker.tick() => {
				if manager.pending_count().await > 0 {
					report("scheduled sync", manager.sync().await);
				}
			}
			changed = online_rx.changed() => {
				if changed.is_err() {
					break;
				}
				let online = *online_rx.borrow_and_update();
				manager.on_connectivity_change(online);
				if online && manager.pending_count().await > 0 {
					report("reconnect sync", manager.sync().await);
				}
			}
			changed = status_rx.changed() => {
				if changed.is_err() {
					break;
				}
				let now = status_rx.borrow_and_update().authenticated;
				if now && !authenticated {
					report("login pull", manager.pull().await);
				}
				authenticated = now;
			}
		}
	}
}

fn report<T>(trigger: &str, result: Result<SyncOutcome<T>, SyncError>) {
	match result {
		Ok(SyncOutcome::Completed(_)) => debug!(trigger, "sync trigger completed"),
		Ok(SyncOutcome::Skipped(reason)) => debug!(trigger, ?reason, "sync trigger skipped"),
		Ok(SyncOutcome::AlreadyRunning) => debug!(trigger, "sync already in flight"),
		Err(e) => warn!(trigger, error = %e, "sync trigger failed"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{empty_pull, manager_with, record, ScriptedFetch};
	use crate::wire::{PULL_PATH, PUSH_PATH};
	use serde_json::json;

	const INTERVAL: Duration = Duration::from_secs(30);

	fn ack(id: &str) -> serde_json::Value {
		json!({"results": {"created": [id]}, "serverTime": "2025-01-01T00:00:00Z"})
	}

	#[tokio::test(start_paused = true)]
	async fn login_triggers_pull_only() {
		let fetch = ScriptedFetch::new();
		fetch.respond(PULL_PATH, 200, empty_pull("2025-01-01T00:00:00Z"));
		let manager = manager_with(fetch.clone(), true, false).await;
		let scheduler = SyncScheduler::new(manager.clone(), INTERVAL);
		scheduler.start().await;

		manager.set_authenticated(true);
		fetch.wait_for_calls_timed(1).await;

		assert_eq!(fetch.calls_to(PULL_PATH).len(), 1);
		assert!(fetch.calls_to(PUSH_PATH).is_empty());
		scheduler.shutdown().await;
	}

	#[tokio::test(start_paused = true)]
	async fn idle_client_never_polls() {
		let fetch = ScriptedFetch::new();
		fetch.respond(PULL_PATH, 200, empty_pull("2025-01-01T00:00:00Z"));
		let manager = manager_with(fetch.clone(), true, true).await;
		let scheduler = SyncScheduler::new(manager, INTERVAL);
		scheduler.start().await;

		tokio::time::sleep(INTERVAL * 5).await;

		// Only the bootstrap pull.
		assert_eq!(fetch.call_count(), 1);
		scheduler.shutdown().await;
	}

	#[tokio::test(start_paused = true)]
	async fn tick_syncs_pending_work() {
		let fetch = ScriptedFetch::new();
		fetch.respond(PULL_PATH, 200, empty_pull("2025-01-01T00:00:00Z"));
		fetch.respond(PUSH_PATH, 200, ack("m1"));
		fetch.respond(PULL_PATH, 200, empty_pull("2025-01-01T00:00:30Z"));
		let manager = manager_with(fetch.clone(), true, true).await;
		let scheduler = SyncScheduler::new(manager.clone(), INTERVAL);
		scheduler.start().await;
		fetch.wait_for_calls_timed(1).await;

		manager.add_with_sync(record("m1", "A")).await.unwrap();
		fetch.wait_for_calls_timed(3).await;

		assert_eq!(fetch.calls_to(PUSH_PATH).len(), 1);
		assert_eq!(manager.pending_count().await, 0);
		assert_eq!(
			manager.status().last_sync_at.as_deref(),
			Some("2025-01-01T00:00:30Z")
		);
		scheduler.shutdown().await;
	}

	#[tokio::test(start_paused = true)]
	async fn reconnect_flushes_offline_edits() {
		let fetch = ScriptedFetch::new();
		fetch.respond(PUSH_PATH, 200, ack("m1"));
		fetch.respond(PULL_PATH, 200, empty_pull("2025-01-01T00:00:00Z"));
		let manager = manager_with(fetch.clone(), false, true).await;
		let scheduler = SyncScheduler::new(manager.clone(), Duration::from_secs(3600));
		scheduler.start().await;

		manager.add_with_sync(record("m1", "Offline edit")).await.unwrap();
		tokio::time::sleep(Duration::from_secs(1)).await;
		assert_eq!(fetch.call_count(), 0);

		manager.connectivity().set_online(true);
		fetch.wait_for_calls_timed(2).await;

		assert_eq!(fetch.calls_to(PUSH_PATH).len(), 1);
		assert_eq!(manager.pending_count().await, 0);
		scheduler.shutdown().await;
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_stops_ticks() {
		let fetch = ScriptedFetch::new();
		let manager = manager_with(fetch.clone(), true, false).await;
		let scheduler = SyncScheduler::new(manager.clone(), INTERVAL);
		scheduler.start().await;
		scheduler.shutdown().await;

		manager.set_authenticated(true);
		manager.add_with_sync(record("m1", "A")).await.unwrap();
		tokio::time::sleep(INTERVAL * 3).await;

		assert_eq!(fetch.call_count(), 0);
	}
}
