// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

mod commands;
mod context;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use loom_common_sync::{AuthToken, SyncConfig};
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::commands::SyncCommands;
use crate::context::SyncContext;

#[derive(Parser, Debug)]
#[command(name = "loom-sync", version, about = "Local-first record sync", long_about = None)]
struct Args {
	/// Path to config file
	#[arg(short, long, global = true)]
	config: Option<PathBuf>,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, global = true)]
	log_level: Option<String>,

	/// Base URL of the sync API
	#[arg(long, global = true)]
	server_url: Option<String>,

	/// Directory holding records and sync state
	#[arg(long, global = true)]
	data_dir: Option<PathBuf>,

	/// Bearer token for the sync API
	#[arg(
		long,
		global = true,
		env = "LOOM_SYNC_TOKEN",
		hide_env_values = true,
		value_parser = parse_token
	)]
	token: Option<AuthToken>,

	#[command(subcommand)]
	command: SyncCommands,
}

fn parse_token(raw: &str) -> Result<AuthToken, String> {
	let raw = raw.trim();
	if raw.is_empty() {
		return Err("token must not be empty".to_string());
	}
	Ok(AuthToken::new(raw))
}

fn init_tracing(level: &str) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::new(format!(
			"loom_common_sync={level},loom_sync={level},loom_common_http={level}"
		))
	});

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_writer(std::io::stderr).with_target(false))
		.init();
}

fn apply_cli_overrides(config: &mut SyncConfig, args: &Args) -> anyhow::Result<()> {
	if let Some(url) = &args.server_url {
		config.server_url = Some(url.clone());
	}
	if let Some(dir) = &args.data_dir {
		config.data_dir = Some(dir.clone());
	}
	if let Some(level) = &args.log_level {
		config.log_level = level.clone();
	}
	config.validate().context("invalid configuration")?;
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let mut config =
		SyncConfig::resolve(args.config.as_deref()).context("failed to load configuration")?;
	apply_cli_overrides(&mut config, &args)?;

	init_tracing(&config.log_level);
	debug!(command = ?args.command, "starting loom-sync");

	let ctx = SyncContext::open(config, args.token.clone()).await?;
	let result = commands::run(&ctx, args.command).await;
	ctx.close();
	result
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn token_is_trimmed_and_required() {
		assert_eq!(parse_token("  abc ").unwrap().expose(), "abc");
		assert!(parse_token("   ").is_err());
	}

	#[test]
	fn cli_flags_override_config() {
		let args = Args::parse_from([
			"loom-sync",
			"--server-url",
			"https://sync.example.com/api/",
			"--data-dir",
			"/tmp/loom-sync",
			"status",
		]);
		let mut config = SyncConfig::default();

		apply_cli_overrides(&mut config, &args).unwrap();

		assert_eq!(
			config.server_url.as_deref(),
			Some("https://sync.example.com/api/")
		);
		assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/loom-sync")));
	}

	#[test]
	fn bad_server_url_flag_is_rejected() {
		let args = Args::parse_from(["loom-sync", "--server-url", "nope", "status"]);
		let mut config = SyncConfig::default();
		assert!(apply_cli_overrides(&mut config, &args).is_err());
	}

	#[test]
	fn token_debug_is_redacted() {
		let args = Args::parse_from(["loom-sync", "--token", "s3cret", "status"]);
		assert!(!format!("{args:?}").contains("s3cret"));
	}
}
