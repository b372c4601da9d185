// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use anyhow::Context;
use loom_common_sync::{
	AuthToken, ConnectivityMonitor, FileEngine, FileStateStorage, FileTabChannel, HttpAuthFetch,
	LocalStore, ProcessLock, SyncClient, SyncConfig, SyncManager, SyncStateStore, TabChannel,
	TabCoordinator, TcpProbe,
};
use tracing::{debug, info};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080/";

/// Everything a command needs, wired from the resolved config.
pub struct SyncContext {
	pub config: SyncConfig,
	pub store: Arc<LocalStore>,
	pub manager: Arc<SyncManager>,
	pub coordinator: TabCoordinator,
	pub probe: Option<Arc<TcpProbe>>,
}

impl SyncContext {
	pub async fn open(config: SyncConfig, token: Option<AuthToken>) -> anyhow::Result<Self> {
		let (engine, state) = match &config.data_dir {
			Some(dir) => (
				FileEngine::new(dir.clone()),
				FileStateStorage::new(dir.join("state")),
			),
			None => (FileEngine::from_xdg()?, FileStateStorage::from_xdg()?),
		};
		debug!(path = %engine.path().display(), "record file");

		// Every process opening this data directory shares the lock and channel.
		let lock = ProcessLock::file(engine.path().with_extension("lock"));
		let channel: Arc<dyn TabChannel> = Arc::new(FileTabChannel::new(
			engine
				.path()
				.parent()
				.map(|dir| dir.join("tabs"))
				.unwrap_or_else(|| "tabs".into()),
		));
		let coordinator = TabCoordinator::new(Some(channel), config.throttle_window());
		let store = Arc::new(
			LocalStore::new(Arc::new(engine))
				.with_schema(config.schema.clone())
				.with_retry_config(config.storage_retry())
				.with_notifier(coordinator.notifier()),
		);

		let server_url = config.server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL);
		let mut fetch = HttpAuthFetch::new(server_url, config.request_timeout())
			.with_context(|| format!("invalid server URL {server_url}"))?;
		let authenticated = token.is_some();
		if let Some(token) = token {
			fetch = fetch.with_token(token);
		}

		let probe = TcpProbe::from_url(fetch.base_url(), config.request_timeout()).map(Arc::new);
		let connectivity = match &probe {
			Some(probe) => ConnectivityMonitor::from_probe(probe.as_ref()).await,
			None => ConnectivityMonitor::new(false),
		};

		let manager = SyncManager::new(
			Arc::clone(&store),
			SyncClient::new(Arc::new(fetch)),
			SyncStateStore::new(state),
			connectivity,
		)
		.await
		.context("failed to restore sync state")?
		.with_process_lock(lock);
		manager.set_authenticated(authenticated);

		info!(
			server_url,
			tab_id = %coordinator.tab_id(),
			online = manager.connectivity().is_online(),
			authenticated,
			"sync context ready"
		);

		Ok(Self {
			config,
			store,
			manager: Arc::new(manager),
			coordinator,
			probe,
		})
	}

	/// Delivers any throttled change notice before the process exits.
	pub fn close(&self) {
		self.coordinator.notifier().flush();
	}
}
