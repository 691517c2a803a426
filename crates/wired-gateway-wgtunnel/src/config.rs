// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ipnet::IpNet;
use std::net::IpAddr;
use std::time::Duration;
use wired_wgtunnel_common::{GatewayId, GatewayRegistration, WgPublicKey};

pub const DEFAULT_PORT: u16 = 51820;

#[derive(Debug, Clone)]
pub struct AgentConfig {
	pub interface: GatewayId,
	/// Host name or address clients dial.
	pub endpoint: String,
	/// Advertised to clients and used as the interface listen port.
	pub port: u16,
	/// Gateway address with the client subnet prefix, e.g. `10.100.0.1/24`.
	pub network: IpNet,
	pub allowed_ips: Vec<IpNet>,
	pub dns: Vec<IpAddr>,
	pub reconnect_base_delay: Duration,
	pub reconnect_max_delay: Duration,
	/// How long to wait for the unsubscribe acknowledgement on shutdown.
	pub close_grace: Duration,
}

impl AgentConfig {
	pub fn new(interface: GatewayId, endpoint: impl Into<String>, network: IpNet) -> Self {
		Self {
			interface,
			endpoint: endpoint.into(),
			port: DEFAULT_PORT,
			network,
			allowed_ips: vec![network.trunc()],
			dns: Vec::new(),
			reconnect_base_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
			close_grace: Duration::from_secs(2),
		}
	}

	pub fn registration(&self, public_key: WgPublicKey) -> GatewayRegistration {
		GatewayRegistration {
			interface: self.interface.clone(),
			endpoint: self.endpoint.clone(),
			port: self.port,
			public_key,
			network: self.network,
			allowed_ips: self.allowed_ips.clone(),
			dns: self.dns.clone(),
		}
	}

	/// Exponential backoff for the `failures`-th consecutive failed
	/// session, capped at `reconnect_max_delay`, plus up to a quarter of
	/// jitter.
	pub fn backoff(&self, failures: u32) -> Duration {
		let factor = 2u64.saturating_pow(failures.saturating_sub(1).min(10));
		let base_ms = self.reconnect_base_delay.as_millis() as u64;
		let delay_ms = base_ms
			.saturating_mul(factor)
			.min(self.reconnect_max_delay.as_millis() as u64);
		let jitter_ms = fastrand::u64(0..=delay_ms / 4);
		Duration::from_millis(delay_ms + jitter_ms)
	}
}
