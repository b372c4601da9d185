// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Last-writer-wins merge of pulled changes into the local collection.

use std::collections::HashMap;

use crate::model::{Record, RecordId, SyncStatus};
use crate::pending::{ChangeOperation, PendingChangeQueue};
use crate::wire::RemoteChange;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeOutcome {
	pub records: Vec<Record>,
	/// Ids whose pending entry lost to the server's state.
	pub superseded: Vec<RecordId>,
	pub inserted: usize,
	pub updated: usize,
	pub removed: usize,
	pub kept_local: usize,
}

impl MergeOutcome {
	pub fn changed(&self) -> bool {
		self.inserted + self.updated + self.removed > 0
	}
}

/// Applies `changes` to `local`.
///
/// - A tombstone removes the local copy.
/// - An unknown id is inserted as synced, unless a pending local delete is at
///   least as recent.
/// - A known id is replaced only when the remote `updatedAt` is strictly
///   newer. Ties keep the local copy, so re-applying a pull is a no-op.
pub fn merge_remote(
	local: Vec<Record>,
	changes: Vec<RemoteChange>,
	pending: &PendingChangeQueue,
) -> MergeOutcome {
	let mut slots: Vec<Option<Record>> = local.into_iter().map(Some).collect();
	let mut index: HashMap<RecordId, usize> = slots
		.iter()
		.enumerate()
		.filter_map(|(i, r)| r.as_ref().map(|r| (r.id.clone(), i)))
		.collect();

	let mut outcome = MergeOutcome::default();

	for change in changes {
		match change {
			RemoteChange::Tombstone { id, .. } => {
				if let Some(slot) = index.get(&id).and_then(|&i| slots.get_mut(i)) {
					if slot.take().is_some() {
						outcome.removed += 1;
					}
				}
				if pending.get(&id).is_some() {
					outcome.superseded.push(id);
				}
			}
			RemoteChange::Upsert(mut remote) => {
				remote.sync_status = SyncStatus::Synced;
				let id = remote.id.clone();
				let existing = index.get(&id).copied();
				let local_updated_at = existing
					.and_then(|i| slots[i].as_ref())
					.map(|r| r.updated_at);

				match local_updated_at {
					Some(current) if remote.updated_at <= current => {
						outcome.kept_local += 1;
					}
					Some(_) => {
						if let Some(i) = existing {
							slots[i] = Some(remote);
						}
						outcome.updated += 1;
						if pending.get(&id).is_some() {
							outcome.superseded.push(id);
						}
					}
					None => {
						if deleted_locally_since(pending, &id, &remote) {
							outcome.kept_local += 1;
							continue;
						}
						match existing {
							Some(i) => slots[i] = Some(remote),
							None => {
								index.insert(id.clone(), slots.len());
								slots.push(Some(remote));
							}
						}
						outcome.inserted += 1;
						if pending.get(&id).is_some() {
							outcome.superseded.push(id);
						}
					}
				}
			}
		}
	}

	outcome.records = slots.into_iter().flatten().collect();
	outcome
}

fn deleted_locally_since(pending: &PendingChangeQueue, id: &RecordId, remote: &Record) -> bool {
	pending
		.get(id)
		.filter(|change| change.operation == ChangeOperation::Delete)
		.and_then(|change| change.payload_updated_at())
		.is_some_and(|deleted_at| deleted_at >= remote.updated_at)
}
