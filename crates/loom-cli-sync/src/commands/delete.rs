// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use colored::Colorize;
use loom_common_sync::RecordId;

use crate::context::SyncContext;

#[derive(Debug, Clone, clap::Args)]
pub struct DeleteArgs {
	/// Record id
	pub id: String,
}

pub async fn run(ctx: &SyncContext, args: DeleteArgs) -> anyhow::Result<()> {
	let id = RecordId::parse(&args.id).map_err(|e| anyhow::anyhow!(e))?;
	ctx.manager.delete_with_sync(&id).await?;

	println!("{} Deleted {}", "✓".green(), id.as_str().cyan());
	Ok(())
}
