// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use colored::Colorize;
use loom_common_sync::{Record, RecordId};
use serde_json::Value;

use super::{into_fields, parse_field};
use crate::context::SyncContext;

#[derive(Debug, Clone, clap::Args)]
pub struct AddArgs {
	/// Fields as KEY=VALUE, e.g. title="Reading list"
	#[arg(required = true, value_parser = parse_field)]
	pub fields: Vec<(String, Value)>,

	/// Use this id instead of generating one
	#[arg(long)]
	pub id: Option<String>,
}

pub async fn run(ctx: &SyncContext, args: AddArgs) -> anyhow::Result<()> {
	let id = match args.id {
		Some(raw) => RecordId::parse(&raw).map_err(|e| anyhow::anyhow!(e))?,
		None => RecordId::new(),
	};
	let mut record = Record::new(id);
	record.fields = into_fields(args.fields);

	let saved = ctx.manager.add_with_sync(record).await?;

	println!(
		"{} Added {} {}",
		"✓".green(),
		saved.id.as_str().cyan(),
		"(pending)".yellow()
	);
	Ok(())
}
