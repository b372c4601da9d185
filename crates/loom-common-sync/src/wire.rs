// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! JSON bodies of the `/sync/pull` and `/sync/push` endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Record, RecordId};
use crate::pending::{ChangeOperation, PendingChange};

pub const PULL_PATH: &str = "sync/pull";
pub const PUSH_PATH: &str = "sync/push";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
	pub last_sync_at: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
	#[serde(default)]
	pub models: Vec<Value>,
	pub server_time: String,
	#[serde(default)]
	pub count: u64,
}

/// A single entry of a pull response, classified.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteChange {
	Upsert(Record),
	Tombstone {
		id: RecordId,
		deleted_at: DateTime<Utc>,
	},
}

impl RemoteChange {
	/// Tombstones only need `id` and `deletedAt`; anything else must parse as
	/// a full record.
	pub fn from_value(value: Value) -> Result<Self, String> {
		let deleted_at = value
			.get("deletedAt")
			.filter(|v| !v.is_null())
			.map(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()))
			.transpose()
			.map_err(|e| format!("invalid deletedAt: {e}"))?;

		if let Some(deleted_at) = deleted_at {
			let id = value
				.get("id")
				.and_then(Value::as_str)
				.ok_or_else(|| "tombstone without id".to_string())
				.and_then(RecordId::parse)?;
			return Ok(Self::Tombstone { id, deleted_at });
		}

		serde_json::from_value::<Record>(value)
			.map(Self::Upsert)
			.map_err(|e| format!("invalid record: {e}"))
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushChange {
	pub operation: ChangeOperation,
	pub model: Value,
}

impl From<&PendingChange> for PushChange {
	fn from(change: &PendingChange) -> Self {
		Self {
			operation: change.operation,
			model: change.payload.clone(),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
	pub changes: Vec<PushChange>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushConflict {
	pub id: String,
	#[serde(default)]
	pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResults {
	#[serde(default)]
	pub created: Vec<String>,
	#[serde(default)]
	pub updated: Vec<String>,
	#[serde(default)]
	pub deleted: Vec<String>,
	#[serde(default)]
	pub conflicts: Vec<PushConflict>,
}

impl PushResults {
	pub fn applied_count(&self) -> usize {
		self.created.len() + self.updated.len() + self.deleted.len()
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
	#[serde(default)]
	pub results: PushResults,
	pub server_time: String,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn pull_request_serializes_null_cursor() {
		let req = PullRequest { last_sync_at: None };
		assert_eq!(
			serde_json::to_value(req).unwrap(),
			json!({"lastSyncAt": null})
		);
	}

	#[test]
	fn tombstone_needs_only_id() {
		let change = RemoteChange::from_value(json!({
			"id": "m1",
			"deletedAt": "2025-01-02T00:00:00Z"
		}))
		.unwrap();

		match change {
			RemoteChange::Tombstone { id, .. } => assert_eq!(id.as_str(), "m1"),
			other => panic!("expected tombstone, got {other:?}"),
		}
	}

	#[test]
	fn null_deleted_at_is_an_upsert() {
		let change = RemoteChange::from_value(json!({
			"id": "m1",
			"title": "Hello",
			"updatedAt": "2025-01-02T00:00:00Z",
			"deletedAt": null
		}))
		.unwrap();

		let RemoteChange::Upsert(record) = change else {
			panic!("expected upsert");
		};
		assert_eq!(record.field_str("title"), Some("Hello"));
	}

	#[test]
	fn record_without_updated_at_is_invalid() {
		assert!(RemoteChange::from_value(json!({"id": "m1", "title": "x"})).is_err());
	}

	#[test]
	fn push_response_tolerates_missing_lists() {
		let resp: PushResponse = serde_json::from_value(json!({
			"results": {"created": ["a"], "conflicts": [{"id": "b", "reason": "server newer"}]},
			"serverTime": "2025-01-02T00:00:00Z"
		}))
		.unwrap();

		assert_eq!(resp.results.created, vec!["a"]);
		assert!(resp.results.updated.is_empty());
		assert_eq!(resp.results.conflicts[0].id, "b");
		assert_eq!(resp.results.applied_count(), 1);
	}

	#[test]
	fn push_change_shape() {
		let change = PushChange {
			operation: ChangeOperation::Delete,
			model: json!({"id": "m1"}),
		};
		assert_eq!(
			serde_json::to_value(change).unwrap(),
			json!({"operation": "delete", "model": {"id": "m1"}})
		);
	}
}
