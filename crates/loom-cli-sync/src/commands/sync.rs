// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use colored::Colorize;

use super::{completed, print_pull, print_push};
use crate::context::SyncContext;

pub async fn run(ctx: &SyncContext) -> anyhow::Result<()> {
	let Some(summary) = completed("sync", ctx.manager.sync().await?) else {
		return Ok(());
	};

	match &summary.push {
		Some(push) => print_push(push),
		None => println!("{} {}", "-".dimmed(), "nothing to push".dimmed()),
	}
	if let Some(pull) = &summary.pull {
		print_pull(pull);
	}
	Ok(())
}
