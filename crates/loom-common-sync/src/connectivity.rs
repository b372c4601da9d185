// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Online/offline signal.
//!
//! ```text
//!   probe task ──set_online──► watch<bool> ──► SyncScheduler
//!   host event ──set_online──┘            └──► SyncManager (state machine)
//! ```
//!
//! The monitor only relays transitions; it never retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
	tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
	pub fn new(initially_online: bool) -> Self {
		let (tx, _rx) = watch::channel(initially_online);
		Self { tx: Arc::new(tx) }
	}

	/// Runs `probe` once and starts with its answer.
	pub async fn from_probe(probe: &dyn ConnectivityProbe) -> Self {
		Self::new(probe.check().await)
	}

	/// Returns `true` if this call changed the signal.
	pub fn set_online(&self, online: bool) -> bool {
		let changed = self.tx.send_if_modified(|current| {
			if *current == online {
				false
			} else {
				*current = online;
				true
			}
		});

		if changed {
			if online {
				info!("connectivity restored");
			} else {
				warn!("connectivity lost");
			}
		}
		changed
	}

	pub fn is_online(&self) -> bool {
		*self.tx.borrow()
	}

	pub fn subscribe(&self) -> watch::Receiver<bool> {
		self.tx.subscribe()
	}

	/// Polls `probe` every `interval` until `cancel` fires.
	pub fn spawn_probe(
		&self,
		probe: Arc<dyn ConnectivityProbe>,
		interval: Duration,
		cancel: CancellationToken,
	) -> JoinHandle<()> {
		let monitor = self.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

			loop {
				tokio::select! {
					_ = cancel.cancelled() => {
						debug!("connectivity probe stopped");
						break;
					}
					_ = ticker.tick() => {
						let online = probe.check().await;
						monitor.set_online(online);
					}
				}
			}
		})
	}
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
	async fn check(&self) -> bool;
}

/// Considers the host online when a TCP connection to the sync server opens
/// within `timeout`.
#[derive(Clone, Debug)]
pub struct TcpProbe {
	addr: String,
	timeout: Duration,
}

impl TcpProbe {
	pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
		Self {
			addr: addr.into(),
			timeout,
		}
	}

	pub fn from_url(url: &Url, timeout: Duration) -> Option<Self> {
		let host = url.host_str()?;
		let port = url.port_or_known_default()?;
		Some(Self::new(format!("{host}:{port}"), timeout))
	}

	pub fn addr(&self) -> &str {
		&self.addr
	}
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
	async fn check(&self) -> bool {
		match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
			Ok(Ok(_)) => true,
			Ok(Err(e)) => {
				debug!(addr = %self.addr, error = %e, "probe connect failed");
				false
			}
			Err(_) => {
				debug!(addr = %self.addr, "probe timed out");
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicBool, Ordering};
	use tokio::net::TcpListener;

	struct FlagProbe(AtomicBool);

	#[async_trait]
	impl ConnectivityProbe for FlagProbe {
		async fn check(&self) -> bool {
			self.0.load(Ordering::SeqCst)
		}
	}

	#[test]
	fn set_online_reports_transitions_only() {
		let monitor = ConnectivityMonitor::new(true);
		assert!(!monitor.set_online(true));
		assert!(monitor.set_online(false));
		assert!(!monitor.is_online());
	}

	#[tokio::test]
	async fn subscribers_see_transitions() {
		let monitor = ConnectivityMonitor::new(false);
		let mut rx = monitor.subscribe();

		monitor.set_online(true);

		rx.changed().await.unwrap();
		assert!(*rx.borrow_and_update());
	}

	#[tokio::test]
	async fn startup_check_uses_probe() {
		let probe = FlagProbe(AtomicBool::new(false));
		assert!(!ConnectivityMonitor::from_probe(&probe).await.is_online());
	}

	#[tokio::test(start_paused = true)]
	async fn probe_task_relays_changes() {
		let monitor = ConnectivityMonitor::new(true);
		let probe = Arc::new(FlagProbe(AtomicBool::new(true)));
		let cancel = CancellationToken::new();
		let mut rx = monitor.subscribe();

		let handle = monitor.spawn_probe(probe.clone(), Duration::from_secs(5), cancel.clone());

		probe.0.store(false, Ordering::SeqCst);
		rx.changed().await.unwrap();
		assert!(!*rx.borrow_and_update());

		probe.0.store(true, Ordering::SeqCst);
		rx.changed().await.unwrap();
		assert!(*rx.borrow_and_update());

		cancel.cancel();
		handle.await.unwrap();
	}

	#[tokio::test]
	async fn tcp_probe_detects_listener() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
		assert!(probe.check().await);
	}

	#[test]
	fn tcp_probe_from_url_uses_default_port() {
		let url = Url::parse("https://sync.example.com/api/").unwrap();
		let probe = TcpProbe::from_url(&url, Duration::from_secs(1)).unwrap();
		assert_eq!(probe.addr(), "sync.example.com:443");
	}
}
