// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

pub mod add;
pub mod delete;
pub mod list;
pub mod logout;
pub mod pull;
pub mod push;
pub mod run;
pub mod status;
pub mod sync;
pub mod update;

use colored::Colorize;
use loom_common_sync::{PullSummary, PushSummary, SkipReason, SyncOutcome};
use serde_json::{Map, Value};

use crate::context::SyncContext;

#[derive(Debug, clap::Subcommand)]
pub enum SyncCommands {
	/// List local records
	List(list::ListArgs),
	/// Create a record and queue it for push
	Add(add::AddArgs),
	/// Change fields on a record and queue it for push
	Update(update::UpdateArgs),
	/// Delete a record and queue the deletion
	Delete(delete::DeleteArgs),
	/// Fetch remote changes since the last sync
	Pull,
	/// Send pending changes
	Push,
	/// Push, then pull
	Sync,
	/// Show sync state and the pending queue
	Status(status::StatusArgs),
	/// Drop the pending queue and sync cursor
	Logout,
	/// Keep syncing in the foreground until interrupted
	Run,
}

pub async fn run(ctx: &SyncContext, cmd: SyncCommands) -> anyhow::Result<()> {
	match cmd {
		SyncCommands::List(args) => list::run(ctx, args).await,
		SyncCommands::Add(args) => add::run(ctx, args).await,
		SyncCommands::Update(args) => update::run(ctx, args).await,
		SyncCommands::Delete(args) => delete::run(ctx, args).await,
		SyncCommands::Pull => pull::run(ctx).await,
		SyncCommands::Push => push::run(ctx).await,
		SyncCommands::Sync => sync::run(ctx).await,
		SyncCommands::Status(args) => status::run(ctx, args).await,
		SyncCommands::Logout => logout::run(ctx).await,
		SyncCommands::Run => run::run(ctx).await,
	}
}

/// Parses `KEY=VALUE`. The value is read as JSON when it parses, otherwise
/// kept as a plain string, so `done=true` is a boolean and `title=Notes` a
/// string.
pub fn parse_field(raw: &str) -> Result<(String, Value), String> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
	let key = key.trim();
	if key.is_empty() {
		return Err(format!("empty field name in '{raw}'"));
	}
	if matches!(key, "id" | "updatedAt" | "deletedAt" | "syncStatus" | "syncVersion") {
		return Err(format!("'{key}' is managed by the sync engine"));
	}
	let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
	Ok((key.to_string(), value))
}

pub fn into_fields(pairs: Vec<(String, Value)>) -> Map<String, Value> {
	pairs.into_iter().collect()
}

pub fn describe_skip(reason: SkipReason) -> &'static str {
	match reason {
		SkipReason::Offline => "offline",
		SkipReason::NotAuthenticated => "not authenticated (pass --token or set LOOM_SYNC_TOKEN)",
		SkipReason::NothingToPush => "nothing to push",
	}
}

/// Prints the skip or in-flight cases and hands back a completed result.
pub fn completed<T>(label: &str, outcome: SyncOutcome<T>) -> Option<T> {
	match outcome {
		SyncOutcome::Completed(value) => Some(value),
		SyncOutcome::Skipped(reason) => {
			println!("{} {} skipped: {}", "-".dimmed(), label, describe_skip(reason));
			None
		}
		SyncOutcome::AlreadyRunning => {
			println!("{} {} already in progress", "-".dimmed(), label);
			None
		}
	}
}

pub fn print_pull(summary: &PullSummary) {
	println!(
		"{} Pulled {} change(s): {} new, {} updated, {} removed, {} kept local",
		"✓".green(),
		summary.received.to_string().bold(),
		summary.inserted,
		summary.updated,
		summary.removed,
		summary.kept_local,
	);
	if summary.invalid > 0 || summary.rejected > 0 {
		println!(
			"  {} {} unreadable, {} failed validation",
			"!".yellow(),
			summary.invalid,
			summary.rejected
		);
	}
	println!("  {} {}", "cursor".dimmed(), summary.server_time.cyan());
}

pub fn print_push(summary: &PushSummary) {
	println!(
		"{} Pushed {} change(s), {} acknowledged, {} marked synced",
		"✓".green(),
		summary.sent.to_string().bold(),
		summary.acknowledged,
		summary.marked_synced,
	);
	for conflict in &summary.conflicts {
		println!(
			"  {} conflict on {}: {}",
			"!".yellow(),
			conflict.id.cyan(),
			conflict.reason.dimmed()
		);
	}
	if let Some(pull) = &summary.pull {
		print_pull(pull);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn field_values_are_json_when_possible() {
		assert_eq!(parse_field("title=Notes").unwrap(), ("title".into(), json!("Notes")));
		assert_eq!(parse_field("done=true").unwrap(), ("done".into(), json!(true)));
		assert_eq!(parse_field("n=42").unwrap(), ("n".into(), json!(42)));
		assert_eq!(
			parse_field("tags=[\"a\",\"b\"]").unwrap(),
			("tags".into(), json!(["a", "b"]))
		);
	}

	#[test]
	fn value_may_contain_equals() {
		assert_eq!(
			parse_field("content=a=b").unwrap(),
			("content".into(), json!("a=b"))
		);
	}

	#[test]
	fn empty_value_is_an_empty_string() {
		assert_eq!(parse_field("content=").unwrap(), ("content".into(), json!("")));
	}

	#[test]
	fn malformed_fields_are_rejected() {
		assert!(parse_field("title").is_err());
		assert!(parse_field("=x").is_err());
	}

	#[test]
	fn engine_managed_fields_are_rejected() {
		let err = parse_field("updatedAt=2025-01-01T00:00:00Z").unwrap_err();
		assert!(err.contains("managed"));
		assert!(parse_field("id=abc").is_err());
	}
}
