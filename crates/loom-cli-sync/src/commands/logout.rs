// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use colored::Colorize;

use crate::context::SyncContext;

pub async fn run(ctx: &SyncContext) -> anyhow::Result<()> {
	let dropped = ctx.manager.pending_count().await;
	ctx.manager.logout().await?;

	if dropped > 0 {
		println!(
			"{} Discarded {} unsynced change(s)",
			"!".yellow(),
			dropped.to_string().bold()
		);
	}
	println!("{} Sync state cleared", "✓".green());
	Ok(())
}
