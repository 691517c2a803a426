// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Gateway agents run inside the server process.
//!
//! ```toml
//! [[gateways]]
//! interface = "wg0"
//! endpoint = "vpn.example.com"
//! port = 51820
//! network = "10.100.0.1/24"
//! allowed_ips = ["10.0.0.0/8"]
//! dns = ["10.0.0.53"]
//! ```

use ipnet::IpNet;
use serde::Deserialize;
use std::net::IpAddr;
use wired_wgtunnel_common::GatewayId;

use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 51820;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAgentConfig {
	pub interface: GatewayId,
	pub endpoint: String,
	pub port: u16,
	/// Gateway address with the client subnet prefix, e.g. `10.100.0.1/24`.
	pub network: IpNet,
	pub allowed_ips: Vec<IpNet>,
	pub dns: Vec<IpAddr>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GatewayAgentConfigLayer {
	#[serde(default)]
	pub interface: Option<String>,
	#[serde(default)]
	pub endpoint: Option<String>,
	#[serde(default)]
	pub port: Option<u16>,
	#[serde(default)]
	pub network: Option<String>,
	#[serde(default)]
	pub allowed_ips: Option<Vec<String>>,
	#[serde(default)]
	pub dns: Option<Vec<String>>,
}

impl GatewayAgentConfigLayer {
	pub fn finalize(self, index: usize) -> Result<GatewayAgentConfig, ConfigError> {
		let key = |field: &str| format!("gateways[{index}].{field}");
		let missing = |field: &str| ConfigError::Validation(format!("{} is required", key(field)));
		let invalid = |field: &str, message: String| ConfigError::InvalidValue {
			key: key(field),
			message,
		};

		let interface = self.interface.ok_or_else(|| missing("interface"))?;
		let interface = GatewayId::new(interface).map_err(|e| invalid("interface", e.to_string()))?;
		let endpoint = self.endpoint.ok_or_else(|| missing("endpoint"))?;
		let network = self
			.network
			.ok_or_else(|| missing("network"))?
			.parse::<IpNet>()
			.map_err(|e| invalid("network", e.to_string()))?;

		let allowed_ips = match self.allowed_ips {
			Some(nets) => nets
				.iter()
				.map(|n| n.parse::<IpNet>())
				.collect::<Result<Vec<_>, _>>()
				.map_err(|e| invalid("allowed_ips", e.to_string()))?,
			None => vec![network.trunc()],
		};
		let dns = self
			.dns
			.unwrap_or_default()
			.iter()
			.map(|a| a.parse::<IpAddr>())
			.collect::<Result<Vec<_>, _>>()
			.map_err(|e| invalid("dns", e.to_string()))?;

		Ok(GatewayAgentConfig {
			interface,
			endpoint,
			port: self.port.unwrap_or(DEFAULT_PORT),
			network,
			allowed_ips,
			dns,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn layer() -> GatewayAgentConfigLayer {
		GatewayAgentConfigLayer {
			interface: Some("wg0".to_string()),
			endpoint: Some("vpn.example.com".to_string()),
			network: Some("10.100.0.1/24".to_string()),
			..Default::default()
		}
	}

	#[test]
	fn test_defaults_fill_port_and_routes() {
		let config = layer().finalize(0).unwrap();
		assert_eq!(config.port, 51820);
		assert_eq!(config.allowed_ips, vec!["10.100.0.0/24".parse::<IpNet>().unwrap()]);
		assert!(config.dns.is_empty());
		assert_eq!(config.network.addr(), "10.100.0.1".parse::<IpAddr>().unwrap());
	}

	#[test]
	fn test_missing_network_names_the_entry() {
		let mut layer = layer();
		layer.network = None;
		let err = layer.finalize(2).unwrap_err();
		assert!(err.to_string().contains("gateways[2].network"));
	}

	#[test]
	fn test_bad_dns_rejected() {
		let mut layer = layer();
		layer.dns = Some(vec!["not-an-ip".to_string()]);
		assert!(matches!(
			layer.finalize(0).unwrap_err(),
			ConfigError::InvalidValue { .. }
		));
	}

	#[test]
	fn test_deserialize_from_toml() {
		let layer: GatewayAgentConfigLayer = toml::from_str(
			r#"
interface = "wg1"
endpoint = "eu.vpn.example.com"
port = 51821
network = "10.200.0.1/23"
allowed_ips = ["10.0.0.0/8", "192.168.0.0/16"]
dns = ["10.0.0.53"]
"#,
		)
		.unwrap();
		let config = layer.finalize(0).unwrap();
		assert_eq!(config.interface.as_str(), "wg1");
		assert_eq!(config.port, 51821);
		assert_eq!(config.allowed_ips.len(), 2);
	}
}
