// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use colored::Colorize;
use loom_common_sync::{SyncSnapshot, SyncState};
use serde_json::json;

use crate::context::SyncContext;

#[derive(Debug, Clone, clap::Args)]
pub struct StatusArgs {
	/// List each pending change
	#[arg(short, long)]
	pub verbose: bool,

	/// Print status as JSON
	#[arg(long)]
	pub json: bool,
}

fn state_label(snapshot: &SyncSnapshot) -> colored::ColoredString {
	match snapshot.state {
		SyncState::Idle => "idle".green(),
		SyncState::Syncing => "syncing".cyan(),
		SyncState::Error => "error".red(),
		SyncState::Offline => "offline".yellow(),
	}
}

pub async fn run(ctx: &SyncContext, args: StatusArgs) -> anyhow::Result<()> {
	let snapshot = ctx.manager.status();
	let changes = ctx.manager.pending_changes().await;

	if args.json {
		let value = json!({
			"status": snapshot,
			"pendingChanges": if args.verbose { json!(changes) } else { json!(null) },
		});
		println!("{}", serde_json::to_string_pretty(&value)?);
		return Ok(());
	}

	println!("{} {}", "State:".bold(), state_label(&snapshot));
	println!(
		"  {:<14} {}",
		"online".dimmed(),
		if snapshot.online { "yes".green() } else { "no".yellow() }
	);
	println!(
		"  {:<14} {}",
		"authenticated".dimmed(),
		if snapshot.authenticated { "yes".green() } else { "no".yellow() }
	);
	println!(
		"  {:<14} {}",
		"last sync".dimmed(),
		snapshot.last_sync_at.as_deref().unwrap_or("never")
	);
	println!("  {:<14} {}", "pending".dimmed(), snapshot.pending.to_string().bold());
	if let Some(error) = &snapshot.last_error {
		println!("  {:<14} {}", "last error".dimmed(), error.red());
	}

	if args.verbose && !changes.is_empty() {
		println!("{}", "Pending changes:".bold());
		for change in &changes {
			println!(
				"  {} {} {}",
				change.operation.as_str().yellow(),
				change.id.as_str().cyan(),
				change.queued_at.to_rfc3339().dimmed()
			);
		}
	}
	Ok(())
}
