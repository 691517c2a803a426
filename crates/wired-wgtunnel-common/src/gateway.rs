// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Gateway identity and the registration contract between a gateway agent
//! and the control plane.

use crate::keys::WgPublicKey;
use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_INTERFACE_LEN: usize = 15;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid gateway interface name: {0:?}")]
pub struct InvalidGatewayId(pub String);

/// A gateway is identified by the name of the tunnel interface it serves.
/// The same name is its propagation channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GatewayId(String);

impl GatewayId {
	pub fn new(name: impl Into<String>) -> Result<Self, InvalidGatewayId> {
		let name = name.into();
		let valid = !name.is_empty()
			&& name != "."
			&& name != ".."
			&& name.len() <= MAX_INTERFACE_LEN
			&& name
				.chars()
				.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
		if valid {
			Ok(Self(name))
		} else {
			Err(InvalidGatewayId(name))
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn channel(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for GatewayId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl TryFrom<String> for GatewayId {
	type Error = InvalidGatewayId;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl From<GatewayId> for String {
	fn from(id: GatewayId) -> Self {
		id.0
	}
}

impl std::str::FromStr for GatewayId {
	type Err = InvalidGatewayId;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}

/// What a gateway announces about itself when it (re)starts.
///
/// `network` carries the gateway's own tunnel address together with the
/// subnet prefix, e.g. `10.100.0.1/24`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRegistration {
	pub interface: GatewayId,
	pub endpoint: String,
	pub port: u16,
	pub public_key: WgPublicKey,
	pub network: IpNet,
	#[serde(default)]
	pub allowed_ips: Vec<IpNet>,
	#[serde(default)]
	pub dns: Vec<IpAddr>,
}

impl GatewayRegistration {
	pub fn gateway_address(&self) -> IpAddr {
		self.network.addr()
	}

	pub fn subnet(&self) -> IpNet {
		self.network.trunc()
	}
}

#[derive(Error, Debug)]
pub enum RegistrationError {
	#[error("registration rejected: {0}")]
	Rejected(String),

	#[error("control plane unavailable: {0}")]
	Unavailable(String),
}

/// The control-plane side of gateway registration. Registration is
/// idempotent: re-registering replaces the descriptor and replays all valid
/// leases to the gateway.
#[async_trait]
pub trait GatewayRegistrar: Send + Sync {
	async fn register(&self, registration: GatewayRegistration) -> Result<(), RegistrationError>;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys::WgKeyPair;

	#[test]
	fn accepts_interface_names() {
		for name in ["wg0", "wg-corp", "tun_1.eu", "abcdefghijklmno"] {
			assert!(GatewayId::new(name).is_ok(), "{name}");
		}
	}

	#[test]
	fn rejects_bad_interface_names() {
		for name in ["", "wg 0", "wg0:chan", "abcdefghijklmnop", "wg/0", ".", ".."] {
			assert!(GatewayId::new(name).is_err(), "{name}");
		}
	}

	#[test]
	fn channel_is_interface_name() {
		let id: GatewayId = "wg0".parse().unwrap();
		assert_eq!(id.channel(), "wg0");
		assert_eq!(id.to_string(), "wg0");
	}

	#[test]
	fn registration_serde_roundtrip() {
		let keypair = WgKeyPair::generate().unwrap();
		let registration = GatewayRegistration {
			interface: GatewayId::new("wg0").unwrap(),
			endpoint: "vpn.example.com".to_string(),
			port: 51820,
			public_key: *keypair.public_key(),
			network: "10.100.0.1/24".parse().unwrap(),
			allowed_ips: vec!["10.0.0.0/8".parse().unwrap()],
			dns: vec!["10.0.0.53".parse().unwrap()],
		};

		let json = serde_json::to_string(&registration).unwrap();
		let restored: GatewayRegistration = serde_json::from_str(&json).unwrap();
		assert_eq!(restored, registration);
		assert_eq!(restored.gateway_address(), "10.100.0.1".parse::<IpAddr>().unwrap());
		assert_eq!(restored.subnet(), "10.100.0.0/24".parse::<IpNet>().unwrap());
	}

	#[test]
	fn registration_rejects_bad_interface() {
		let json = r#"{"interface":"not valid","endpoint":"x","port":1,
			"public_key":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=","network":"10.0.0.1/24"}"#;
		assert!(serde_json::from_str::<GatewayRegistration>(json).is_err());
	}
}
