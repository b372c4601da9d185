// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use colored::Colorize;
use loom_common_sync::RecordId;
use serde_json::Value;

use super::parse_field;
use crate::context::SyncContext;

#[derive(Debug, Clone, clap::Args)]
pub struct UpdateArgs {
	/// Record id
	pub id: String,

	/// Fields to set, as KEY=VALUE
	#[arg(value_parser = parse_field)]
	pub set: Vec<(String, Value)>,

	/// Fields to remove
	#[arg(long = "unset", value_name = "KEY")]
	pub unset: Vec<String>,
}

pub async fn run(ctx: &SyncContext, args: UpdateArgs) -> anyhow::Result<()> {
	if args.set.is_empty() && args.unset.is_empty() {
		anyhow::bail!("nothing to change: pass KEY=VALUE or --unset KEY");
	}

	let id = RecordId::parse(&args.id).map_err(|e| anyhow::anyhow!(e))?;
	let UpdateArgs { set, unset, .. } = args;
	let saved = ctx
		.manager
		.update_with_sync(&id, move |record| {
			for key in &unset {
				record.fields.remove(key);
			}
			record.fields.extend(set);
		})
		.await?;

	println!(
		"{} Updated {} at {}",
		"✓".green(),
		saved.id.as_str().cyan(),
		saved.updated_at.to_rfc3339().dimmed()
	);
	Ok(())
}
