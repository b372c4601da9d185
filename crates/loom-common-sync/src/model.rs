// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
	/// Generates a client-side id. UUIDv7 keeps ids roughly creation-ordered.
	pub fn new() -> Self {
		Self(uuid7::uuid7().to_string())
	}

	/// Wraps an existing id (client- or server-assigned) without validation.
	pub fn from_string(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	pub fn parse(s: &str) -> Result<Self, String> {
		let trimmed = s.trim();
		if trimmed.is_empty() {
			return Err("record id must not be empty".to_string());
		}
		Ok(Self(trimmed.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for RecordId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for RecordId {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

/// Local-only marker. Stripped from every payload sent to the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
	#[default]
	Synced,
	Pending,
}

/// The synchronized unit.
///
/// Domain fields live in `fields` and are carried through untouched, so
/// attributes added by newer clients or the server survive a round trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
	pub id: RecordId,
	pub updated_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub sync_status: SyncStatus,
	#[serde(default)]
	pub sync_version: u64,
	#[serde(flatten)]
	pub fields: Map<String, Value>,
}

impl Record {
	pub fn new(id: RecordId) -> Self {
		Self {
			id,
			updated_at: Utc::now(),
			deleted_at: None,
			sync_status: SyncStatus::Pending,
			sync_version: 0,
			fields: Map::new(),
		}
	}

	pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.fields.insert(name.into(), value.into());
		self
	}

	pub fn field_str(&self, name: &str) -> Option<&str> {
		self.fields.get(name).and_then(Value::as_str)
	}

	pub fn is_tombstone(&self) -> bool {
		self.deleted_at.is_some()
	}

	/// Advances `updated_at` for a local write. The new value is strictly
	/// greater than the previous one even if the wall clock has not moved.
	pub fn touch(&mut self) {
		let floor = self.updated_at + Duration::milliseconds(1);
		self.updated_at = Utc::now().max(floor);
		self.sync_status = SyncStatus::Pending;
	}

	/// Marks the record as acknowledged by the server.
	pub fn mark_synced(&mut self) {
		self.sync_status = SyncStatus::Synced;
		self.sync_version += 1;
	}

	/// JSON shape sent to the server: everything except `syncStatus`.
	pub fn to_wire(&self) -> Value {
		let mut value = match serde_json::to_value(self) {
			Ok(Value::Object(map)) => map,
			_ => Map::new(),
		};
		value.remove("syncStatus");
		Value::Object(value)
	}
}
