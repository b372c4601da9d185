// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::client::{AuthFetch, FetchResponse, SyncClient};
use crate::connectivity::ConnectivityMonitor;
use crate::engine::MemoryEngine;
use crate::error::SyncError;
use crate::manager::SyncManager;
use crate::model::{Record, RecordId};
use crate::state::SyncStateStore;
use crate::store::LocalStore;

/// Replies from a per-path script. Optionally parks every request until the
/// test releases it.
#[derive(Default)]
pub(crate) struct ScriptedFetch {
	responses: Mutex<HashMap<String, VecDeque<FetchResponse>>>,
	pub(crate) calls: Mutex<Vec<(String, Value)>>,
	pub(crate) beacons: Mutex<Vec<Value>>,
	gate: Option<Arc<Notify>>,
}

impl ScriptedFetch {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub(crate) fn gated(gate: Arc<Notify>) -> Arc<Self> {
		Arc::new(Self {
			gate: Some(gate),
			..Self::default()
		})
	}

	pub(crate) fn respond(&self, path: &str, status: u16, body: Value) {
		self
			.responses
			.lock()
			.unwrap()
			.entry(path.to_string())
			.or_default()
			.push_back(FetchResponse { status, body });
	}

	pub(crate) fn calls_to(&self, path: &str) -> Vec<Value> {
		self
			.calls
			.lock()
			.unwrap()
			.iter()
			.filter(|(p, _)| p == path)
			.map(|(_, body)| body.clone())
			.collect()
	}

	pub(crate) fn call_count(&self) -> usize {
		self.calls.lock().unwrap().len()
	}

	/// Spins on the scheduler until `n` requests have arrived.
	pub(crate) async fn wait_for_calls(&self, n: usize) {
		while self.call_count() < n {
			tokio::task::yield_now().await;
		}
	}

	/// Like `wait_for_calls`, but sleeps between checks so a paused clock
	/// can auto-advance.
	pub(crate) async fn wait_for_calls_timed(&self, n: usize) {
		while self.call_count() < n {
			tokio::time::sleep(Duration::from_millis(50)).await;
		}
	}
}

#[async_trait]
impl AuthFetch for ScriptedFetch {
	async fn post_json(&self, path: &str, body: Value) -> Result<FetchResponse, SyncError> {
		self.calls.lock().unwrap().push((path.to_string(), body));
		if let Some(gate) = &self.gate {
			gate.notified().await;
		}
		let next = self
			.responses
			.lock()
			.unwrap()
			.get_mut(path)
			.and_then(VecDeque::pop_front);
		Ok(next.unwrap_or(FetchResponse {
			status: 500,
			body: json!({"error": "unscripted request"}),
		}))
	}

	fn beacon(&self, _path: &str, body: Value) {
		self.beacons.lock().unwrap().push(body);
	}
}

pub(crate) fn empty_pull(server_time: &str) -> Value {
	json!({"models": [], "serverTime": server_time, "count": 0})
}

pub(crate) fn record(id: &str, title: &str) -> Record {
	Record::new(RecordId::from_string(id)).with_field("title", title)
}

pub(crate) async fn manager_with(
	fetch: Arc<ScriptedFetch>,
	online: bool,
	authenticated: bool,
) -> Arc<SyncManager> {
	let store = Arc::new(LocalStore::new(Arc::new(MemoryEngine::new())));
	let manager = SyncManager::new(
		store,
		SyncClient::new(fetch),
		SyncStateStore::in_memory(),
		ConnectivityMonitor::new(online),
	)
	.await
	.unwrap();
	manager.set_authenticated(authenticated);
	Arc::new(manager)
}
