// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use super::{completed, print_pull};
use crate::context::SyncContext;

pub async fn run(ctx: &SyncContext) -> anyhow::Result<()> {
	if let Some(summary) = completed("pull", ctx.manager.pull().await?) {
		print_pull(&summary);
	}
	Ok(())
}
