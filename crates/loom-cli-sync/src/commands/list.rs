// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use colored::Colorize;
use loom_common_sync::{Record, SyncStatus};

use crate::context::SyncContext;

#[derive(Debug, Clone, clap::Args)]
pub struct ListArgs {
	/// Include tombstones awaiting the server
	#[arg(long)]
	pub all: bool,

	/// Only records with unsynced local changes
	#[arg(long)]
	pub pending: bool,

	/// Print records as JSON
	#[arg(long)]
	pub json: bool,
}

fn visible(record: &Record, args: &ListArgs) -> bool {
	(args.all || !record.is_tombstone())
		&& (!args.pending || record.sync_status == SyncStatus::Pending)
}

pub async fn run(ctx: &SyncContext, args: ListArgs) -> anyhow::Result<()> {
	let records: Vec<Record> = ctx
		.manager
		.store()
		.load_all()
		.await?
		.into_iter()
		.filter(|r| visible(r, &args))
		.collect();

	if args.json {
		println!("{}", serde_json::to_string_pretty(&records)?);
		return Ok(());
	}

	if records.is_empty() {
		println!("{}", "No records".dimmed());
		return Ok(());
	}

	println!("{}", "Records:".bold());
	for record in &records {
		let status = match (record.is_tombstone(), record.sync_status) {
			(true, _) => "deleted".red(),
			(false, SyncStatus::Pending) => "pending".yellow(),
			(false, SyncStatus::Synced) => "synced".green(),
		};
		println!(
			"  {} {} [{}] {}",
			record.id.as_str().cyan(),
			record.field_str("title").unwrap_or("(untitled)"),
			status,
			record.updated_at.to_rfc3339().dimmed()
		);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use loom_common_sync::RecordId;

	fn args(all: bool, pending: bool) -> ListArgs {
		ListArgs {
			all,
			pending,
			json: false,
		}
	}

	#[test]
	fn tombstones_hidden_unless_all() {
		let mut record = Record::new(RecordId::from_string("a"));
		record.deleted_at = Some(Utc::now());

		assert!(!visible(&record, &args(false, false)));
		assert!(visible(&record, &args(true, false)));
	}

	#[test]
	fn pending_filter_skips_synced() {
		let mut record = Record::new(RecordId::from_string("a"));
		assert!(visible(&record, &args(false, true)));

		record.mark_synced();
		assert!(!visible(&record, &args(false, true)));
		assert!(visible(&record, &args(false, false)));
	}
}
