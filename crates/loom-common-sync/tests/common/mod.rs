// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use loom_common_sync::{
	AuthFetch, ConnectivityMonitor, FetchResponse, LocalStore, MemoryEngine, StorageEngine,
	SyncClient, SyncError, SyncManager, SyncStateStore,
};
use serde_json::{json, Value};

struct Stored {
	model: Value,
	updated_at: DateTime<Utc>,
	changed_at: DateTime<Utc>,
}

#[derive(Default)]
struct ServerState {
	records: HashMap<String, Stored>,
	ticks: i64,
	pulls: usize,
	pushes: usize,
}

impl ServerState {
	fn now(&mut self) -> DateTime<Utc> {
		self.ticks += 1;
		Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(self.ticks)
	}
}

/// In-memory remote store with last-writer-wins on `updatedAt` and its own
/// clock for `serverTime`.
#[derive(Default)]
pub struct FakeServer {
	state: Mutex<ServerState>,
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
	value
		.as_str()
		.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
		.map(|dt| dt.with_timezone(&Utc))
}

fn format_time(t: DateTime<Utc>) -> String {
	t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl FakeServer {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Puts a record on the server as if another device had pushed it.
	pub fn seed(&self, model: Value) {
		let mut state = self.state.lock().unwrap();
		let changed_at = state.now();
		let id = model["id"].as_str().unwrap().to_string();
		let updated_at = parse_time(&model["updatedAt"]).unwrap();
		state.records.insert(
			id,
			Stored {
				model,
				updated_at,
				changed_at,
			},
		);
	}

	pub fn model(&self, id: &str) -> Option<Value> {
		self.state.lock().unwrap().records.get(id).map(|s| s.model.clone())
	}

	pub fn pulls(&self) -> usize {
		self.state.lock().unwrap().pulls
	}

	pub fn pushes(&self) -> usize {
		self.state.lock().unwrap().pushes
	}

	fn pull(&self, body: &Value) -> Value {
		let mut state = self.state.lock().unwrap();
		state.pulls += 1;
		let since = parse_time(&body["lastSyncAt"]);

		let models: Vec<Value> = state
			.records
			.values()
			.filter(|s| since.map_or(true, |since| s.changed_at > since))
			.map(|s| s.model.clone())
			.collect();
		let server_time = state.now();

		json!({
			"models": models,
			"serverTime": format_time(server_time),
			"count": models.len(),
		})
	}

	fn push(&self, body: &Value) -> Value {
		let mut state = self.state.lock().unwrap();
		state.pushes += 1;

		let mut created = Vec::new();
		let mut updated = Vec::new();
		let mut deleted = Vec::new();
		let mut conflicts = Vec::new();

		for change in body["changes"].as_array().cloned().unwrap_or_default() {
			let model = change["model"].clone();
			let id = model["id"].as_str().unwrap_or_default().to_string();
			let incoming = parse_time(&model["updatedAt"]).unwrap_or_else(Utc::now);

			if let Some(existing) = state.records.get(&id) {
				if existing.updated_at > incoming {
					conflicts.push(json!({"id": id, "reason": "server has a newer version"}));
					continue;
				}
			}

			let changed_at = state.now();
			match change["operation"].as_str() {
				Some("delete") => {
					let tombstone = json!({"id": id, "deletedAt": model["deletedAt"].clone()});
					state.records.insert(
						id.clone(),
						Stored {
							model: tombstone,
							updated_at: incoming,
							changed_at,
						},
					);
					deleted.push(id);
				}
				op => {
					let existed = state.records.contains_key(&id);
					state.records.insert(
						id.clone(),
						Stored {
							model,
							updated_at: incoming,
							changed_at,
						},
					);
					if op == Some("create") && !existed {
						created.push(id);
					} else {
						updated.push(id);
					}
				}
			}
		}

		let server_time = state.now();
		json!({
			"results": {
				"created": created,
				"updated": updated,
				"deleted": deleted,
				"conflicts": conflicts,
			},
			"serverTime": format_time(server_time),
		})
	}
}

#[async_trait]
impl AuthFetch for FakeServer {
	async fn post_json(&self, path: &str, body: Value) -> Result<FetchResponse, SyncError> {
		let body = match path {
			"sync/pull" => self.pull(&body),
			"sync/push" => self.push(&body),
			other => {
				return Ok(FetchResponse {
					status: 404,
					body: json!({"error": format!("no route for {other}")}),
				})
			}
		};
		Ok(FetchResponse { status: 200, body })
	}

	fn beacon(&self, _path: &str, body: Value) {
		self.push(&body);
	}
}

pub async fn manager_on(
	server: &Arc<FakeServer>,
	engine: Arc<dyn StorageEngine>,
	state: SyncStateStore,
	online: bool,
) -> Arc<SyncManager> {
	let store = Arc::new(LocalStore::new(engine));
	let fetch: Arc<dyn AuthFetch> = server.clone();
	let manager = SyncManager::new(
		store,
		SyncClient::new(fetch),
		state,
		ConnectivityMonitor::new(online),
	)
	.await
	.unwrap();
	manager.set_authenticated(true);
	Arc::new(manager)
}

pub async fn memory_manager(server: &Arc<FakeServer>, online: bool) -> Arc<SyncManager> {
	manager_on(
		server,
		Arc::new(MemoryEngine::new()),
		SyncStateStore::in_memory(),
		online,
	)
	.await
}
