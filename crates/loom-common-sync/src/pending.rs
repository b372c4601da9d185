// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The outbound queue of local mutations awaiting server acknowledgment.
//!
//! The queue holds at most one entry per record id. New mutations are folded
//! into the existing entry:
//!
//! | existing        | incoming          | result                    |
//! |-----------------|-------------------|---------------------------|
//! | none            | any               | incoming                  |
//! | create          | create / update   | create, newer payload     |
//! | create          | delete            | entry dropped             |
//! | update / delete | create / update   | update, newer payload     |
//! | update / delete | delete            | delete                    |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::model::{Record, RecordId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
	Create,
	Update,
	Delete,
}

impl ChangeOperation {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Create => "create",
			Self::Update => "update",
			Self::Delete => "delete",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
	pub id: RecordId,
	pub operation: ChangeOperation,
	/// Wire form of the record for create/update; `{id, deletedAt}` for delete.
	pub payload: Value,
	/// Queue-local counter, bumped every time this entry is rewritten.
	pub revision: u64,
	pub queued_at: DateTime<Utc>,
}

impl PendingChange {
	/// The `updatedAt` carried by the payload, if any.
	pub fn payload_updated_at(&self) -> Option<DateTime<Utc>> {
		self
			.payload
			.get("updatedAt")
			.and_then(Value::as_str)
			.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
			.map(|dt| dt.with_timezone(&Utc))
	}
}

/// Outcome of folding a mutation into the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackOutcome {
	Appended,
	Coalesced(ChangeOperation),
	/// A create followed by a delete: the server never needs to hear about it.
	Cancelled,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChangeQueue {
	pub entries: Vec<PendingChange>,
	#[serde(default)]
	next_revision: u64,
}

impl PendingChangeQueue {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn track(&mut self, operation: ChangeOperation, record: &Record) -> TrackOutcome {
		let revision = self.bump_revision();
		let payload = match operation {
			ChangeOperation::Delete => delete_payload(record),
			ChangeOperation::Create | ChangeOperation::Update => record.to_wire(),
		};

		let Some(index) = self.entries.iter().position(|e| e.id == record.id) else {
			self.entries.push(PendingChange {
				id: record.id.clone(),
				operation,
				payload,
				revision,
				queued_at: Utc::now(),
			});
			return TrackOutcome::Appended;
		};

		let existing = self.entries[index].operation;
		let merged = match (existing, operation) {
			(ChangeOperation::Create, ChangeOperation::Delete) => {
				self.entries.remove(index);
				return TrackOutcome::Cancelled;
			}
			(_, ChangeOperation::Delete) => ChangeOperation::Delete,
			(ChangeOperation::Create, _) => ChangeOperation::Create,
			(_, _) => ChangeOperation::Update,
		};

		let entry = &mut self.entries[index];
		entry.operation = merged;
		entry.payload = payload;
		entry.revision = revision;
		entry.queued_at = Utc::now();

		TrackOutcome::Coalesced(merged)
	}

	pub fn get(&self, id: &RecordId) -> Option<&PendingChange> {
		self.entries.iter().find(|e| &e.id == id)
	}

	/// Removes the entry for `id` only if it is still the version that was
	/// sent, i.e. it has not been rewritten by a newer mutation since.
	pub fn acknowledge(&mut self, id: &RecordId, revision: u64) -> bool {
		let before = self.entries.len();
		self
			.entries
			.retain(|e| !(&e.id == id && e.revision == revision));
		self.entries.len() < before
	}

	/// Drops the entry for `id` regardless of revision, because the server's
	/// state superseded it.
	pub fn supersede(&mut self, id: &RecordId) -> bool {
		let before = self.entries.len();
		self.entries.retain(|e| &e.id != id);
		self.entries.len() < before
	}

	/// Drops every entry. Revisions keep counting up so an acknowledgment
	/// for a batch sent before the clear can never match a later entry.
	pub fn clear(&mut self) {
		self.entries.clear();
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	fn bump_revision(&mut self) -> u64 {
		self.next_revision += 1;
		self.next_revision
	}
}

fn delete_payload(record: &Record) -> Value {
	json!({
		"id": record.id,
		"updatedAt": record.updated_at,
		"deletedAt": record.deleted_at.unwrap_or(record.updated_at),
	})
}
