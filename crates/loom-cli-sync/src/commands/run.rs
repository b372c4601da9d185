// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use colored::Colorize;
use loom_common_sync::tabs::RemoteChangeCallback;
use loom_common_sync::{CacheInvalidator, ConnectivityProbe, SyncScheduler, TabAction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::SyncContext;

pub async fn run(ctx: &SyncContext) -> anyhow::Result<()> {
	let scheduler = SyncScheduler::new(Arc::clone(&ctx.manager), ctx.config.sync_interval());
	let cancel = CancellationToken::new();

	let probe_task = ctx.probe.clone().map(|probe| {
		let probe: Arc<dyn ConnectivityProbe> = probe;
		ctx.manager
			.connectivity()
			.spawn_probe(probe, ctx.config.probe_interval(), cancel.clone())
	});

	let on_change: RemoteChangeCallback = Arc::new(|action: TabAction, timestamp: u64| {
		debug!(?action, timestamp, "another process changed the records");
	});
	let target: Arc<dyn CacheInvalidator> = ctx.store.clone();
	let listener = ctx.coordinator.listen(target, Some(on_change));

	scheduler.start().await;
	println!(
		"{} Syncing every {}s, press Ctrl-C to stop",
		"✓".green(),
		ctx.config.sync_interval_secs
	);

	tokio::signal::ctrl_c().await?;
	info!("interrupt received, shutting down");

	let unsynced = ctx.manager.prepare_teardown().await;
	if unsynced > 0 {
		warn!(count = unsynced, "exiting with unsynced changes");
		println!(
			"{} {} change(s) not yet confirmed by the server",
			"!".yellow(),
			unsynced.to_string().bold()
		);
	}

	cancel.cancel();
	scheduler.shutdown().await;
	if let Some(listener) = listener {
		listener.abort();
	}
	if let Some(task) = probe_task {
		if let Err(e) = task.await {
			warn!(error = %e, "connectivity probe task failed");
		}
	}
	Ok(())
}
