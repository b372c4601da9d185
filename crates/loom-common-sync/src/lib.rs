// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Local-first record synchronization.
//!
//! A [`LocalStore`] holds the records durably, a [`TabCoordinator`] tells
//! sibling processes sharing the store when it changed, and a
//! [`SyncManager`] reconciles the store with the remote server, driven by a
//! [`SyncScheduler`] and a [`ConnectivityMonitor`].

pub mod client;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod lock;
pub mod manager;
pub mod merge;
pub mod model;
pub mod pending;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod tabs;
pub mod validation;
pub mod wire;

#[cfg(test)]
mod testing;

pub use client::{AuthFetch, AuthToken, FetchResponse, HttpAuthFetch, SyncClient};
pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, TcpProbe};
pub use engine::{FileEngine, MemoryEngine, StorageEngine};
pub use error::*;
pub use lock::ProcessLock;
pub use manager::{
	PullSummary, PushSummary, SkipReason, SyncManager, SyncOutcome, SyncSnapshot, SyncState,
	SyncSummary,
};
pub use model::*;
pub use pending::{ChangeOperation, PendingChange, PendingChangeQueue, TrackOutcome};
pub use scheduler::SyncScheduler;
pub use state::{FileStateStorage, MemoryStateStorage, StateStorage, SyncStateStore};
pub use store::LocalStore;
pub use tabs::{
	CacheInvalidator, FileTabChannel, LocalTabChannel, Notice, TabAction, TabChannel,
	TabCoordinator, TabId, TabMessage, TabNotifier,
};
pub use validation::{FieldRule, RecordSchema, RejectedRecord, SaveReport};
