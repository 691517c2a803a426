// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wired control plane binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wired_server::Server;
use wired_server_config::{LogFormat, ServerConfig};

/// Wired - multi-gateway WireGuard control plane.
#[derive(Parser, Debug)]
#[command(name = "wired-server", about = "WireGuard lease control plane", version)]
struct Args {
	/// Config file to read instead of /etc/wired/server.toml
	#[arg(long, short, env = "WIRED_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Print the resolved configuration and exit
	CheckConfig,
}

fn init_tracing(config: &ServerConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);

	match config.logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => wired_server_config::load_config_with_file(path)?,
		None => wired_server_config::load_config()?,
	};

	if let Some(Command::CheckConfig) = args.command {
		println!("{config:#?}");
		return Ok(());
	}

	init_tracing(&config);

	tracing::info!(
		backend = ?config.store.backend,
		ttl_secs = config.lease.ttl_secs,
		gateways = config.gateways.len(),
		http_listen_addr = ?config.http.listen_addr,
		"starting wired-server"
	);

	let server = Server::start(&config).await?;

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("Received shutdown signal");
		}
		_ = server.wait_for_agent_exit() => {
			tracing::warn!("Shutting down after gateway agent failure");
		}
	}

	server.shutdown().await;
	tracing::info!("Server shutdown complete");
	Ok(())
}
