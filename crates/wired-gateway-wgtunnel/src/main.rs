// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Gateway agent binary: runs one gateway against a control plane in
//! another process.

use clap::Parser;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use url::Url;
use wired_gateway_wgtunnel::{config::DEFAULT_PORT, AgentConfig, GatewayAgent, HttpControlPlane, MemoryDevice};
use wired_wgtunnel_common::GatewayId;

/// Wired gateway agent.
#[derive(Parser, Debug)]
#[command(name = "wired-gateway", about = "Keeps a WireGuard gateway in step with the Wired control plane", version)]
struct Args {
	/// Control plane gateway endpoint, e.g. http://127.0.0.1:8750
	#[arg(long, env = "WIRED_GATEWAY_SERVER_URL")]
	server_url: Url,

	/// Tunnel interface this agent serves
	#[arg(long, env = "WIRED_GATEWAY_INTERFACE")]
	interface: GatewayId,

	/// Host name or address clients dial
	#[arg(long, env = "WIRED_GATEWAY_ENDPOINT")]
	endpoint: String,

	/// Gateway address with the client subnet prefix, e.g. 10.100.0.1/24
	#[arg(long, env = "WIRED_GATEWAY_NETWORK")]
	network: IpNet,

	#[arg(long, env = "WIRED_GATEWAY_PORT", default_value_t = DEFAULT_PORT)]
	port: u16,

	/// Routes pushed to clients; defaults to the client subnet
	#[arg(long, env = "WIRED_GATEWAY_ALLOWED_IPS", value_delimiter = ',')]
	allowed_ips: Vec<IpNet>,

	#[arg(long, env = "WIRED_GATEWAY_DNS", value_delimiter = ',')]
	dns: Vec<IpAddr>,
}

impl Args {
	fn agent_config(&self) -> AgentConfig {
		let mut config = AgentConfig::new(self.interface.clone(), self.endpoint.clone(), self.network);
		config.port = self.port;
		if !self.allowed_ips.is_empty() {
			config.allowed_ips = self.allowed_ips.clone();
		}
		config.dns = self.dns.clone();
		config
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.init();

	let control = Arc::new(HttpControlPlane::new(args.server_url.clone())?);
	let agent = GatewayAgent::new(args.agent_config(), control.clone(), control, Arc::new(MemoryDevice::new()))?;
	info!(
		gateway = %args.interface,
		server_url = %args.server_url,
		public_key = %agent.public_key(),
		"starting wired-gateway"
	);
	let handle = agent.spawn();

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			info!("Received shutdown signal");
		}
		_ = async {
			while !handle.is_finished() {
				tokio::time::sleep(Duration::from_secs(1)).await;
			}
		} => {
			error!("gateway agent exited");
		}
	}

	handle.shutdown().await?;
	info!("wired-gateway stopped");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allowed_ips_default_to_the_client_subnet() {
		let args = Args::parse_from([
			"wired-gateway",
			"--server-url",
			"http://127.0.0.1:8750",
			"--interface",
			"wg0",
			"--endpoint",
			"vpn.example.com",
			"--network",
			"10.100.0.1/24",
		]);
		let config = args.agent_config();
		assert_eq!(config.port, DEFAULT_PORT);
		assert_eq!(config.allowed_ips, vec!["10.100.0.0/24".parse::<IpNet>().unwrap()]);
	}

	#[test]
	fn lists_are_comma_separated() {
		let args = Args::parse_from([
			"wired-gateway",
			"--server-url",
			"http://127.0.0.1:8750",
			"--interface",
			"wg0",
			"--endpoint",
			"vpn.example.com",
			"--network",
			"10.100.0.1/24",
			"--allowed-ips",
			"10.0.0.0/8,192.168.0.0/16",
			"--dns",
			"10.0.0.53",
		]);
		let config = args.agent_config();
		assert_eq!(config.allowed_ips.len(), 2);
		assert_eq!(config.dns, vec!["10.0.0.53".parse::<IpAddr>().unwrap()]);
	}
}
