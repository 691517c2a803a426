// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The seam between the agent and the local WireGuard interface.
//!
//! Programming a real kernel or userspace interface is platform specific
//! and lives behind [`InterfaceApply`]. [`MemoryDevice`] keeps the same
//! peer table in memory and is what the in-process gateways and the tests
//! drive.

use async_trait::async_trait;
use ipnet::IpNet;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use wired_wgtunnel_common::{GatewayId, WgPresharedKey, WgPrivateKey, WgPublicKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerChange {
	/// Configure the peer, replacing any existing entry for the same key.
	Upsert {
		public_key: WgPublicKey,
		preshared_key: WgPresharedKey,
		allowed_ip: IpNet,
	},
	Remove {
		public_key: WgPublicKey,
	},
}

impl PeerChange {
	pub fn public_key(&self) -> &WgPublicKey {
		match self {
			PeerChange::Upsert { public_key, .. } | PeerChange::Remove { public_key } => public_key,
		}
	}
}

#[derive(Debug, Error)]
pub enum ApplyError {
	#[error("interface {0} is unavailable")]
	InterfaceUnavailable(String),

	#[error("device rejected change: {0}")]
	Rejected(String),
}

#[async_trait]
pub trait InterfaceApply: Send + Sync {
	async fn apply(
		&self,
		interface: &GatewayId,
		private_key: &WgPrivateKey,
		listen_port: u16,
		changes: &[PeerChange],
	) -> Result<(), ApplyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePeer {
	pub preshared_key: WgPresharedKey,
	pub allowed_ips: Vec<IpNet>,
}

#[derive(Default)]
struct InterfaceState {
	public_key: Option<WgPublicKey>,
	listen_port: u16,
	peers: HashMap<WgPublicKey, DevicePeer>,
}

/// In-memory WireGuard interfaces keyed by name.
///
/// Follows the kernel's semantics where they matter to the agent: removing
/// an absent peer is a no-op, and an allowed IP claimed by a new peer is
/// taken away from whichever peer held it before.
#[derive(Default)]
pub struct MemoryDevice {
	interfaces: RwLock<HashMap<GatewayId, InterfaceState>>,
}

impl MemoryDevice {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn peer(&self, interface: &GatewayId, public_key: &WgPublicKey) -> Option<DevicePeer> {
		let interfaces = self.interfaces.read().ok()?;
		interfaces.get(interface)?.peers.get(public_key).cloned()
	}

	pub fn peer_count(&self, interface: &GatewayId) -> usize {
		self.interfaces
			.read()
			.ok()
			.and_then(|i| i.get(interface).map(|s| s.peers.len()))
			.unwrap_or(0)
	}

	pub fn public_keys(&self, interface: &GatewayId) -> Vec<WgPublicKey> {
		self.interfaces
			.read()
			.ok()
			.and_then(|i| i.get(interface).map(|s| s.peers.keys().copied().collect()))
			.unwrap_or_default()
	}

	pub fn listen_port(&self, interface: &GatewayId) -> Option<u16> {
		let interfaces = self.interfaces.read().ok()?;
		interfaces.get(interface).map(|s| s.listen_port)
	}

	/// The public key derived from the private key last applied.
	pub fn interface_key(&self, interface: &GatewayId) -> Option<WgPublicKey> {
		let interfaces = self.interfaces.read().ok()?;
		interfaces.get(interface)?.public_key
	}
}

#[async_trait]
impl InterfaceApply for MemoryDevice {
	#[instrument(skip(self, private_key, changes), fields(%interface, changes = changes.len()))]
	async fn apply(
		&self,
		interface: &GatewayId,
		private_key: &WgPrivateKey,
		listen_port: u16,
		changes: &[PeerChange],
	) -> Result<(), ApplyError> {
		let mut interfaces = self
			.interfaces
			.write()
			.map_err(|_| ApplyError::InterfaceUnavailable(interface.to_string()))?;
		let state = interfaces.entry(interface.clone()).or_default();
		state.public_key = Some(private_key.public_key());
		state.listen_port = listen_port;

		for change in changes {
			match change {
				PeerChange::Upsert {
					public_key,
					preshared_key,
					allowed_ip,
				} => {
					for (other, peer) in state.peers.iter_mut() {
						if other != public_key && peer.allowed_ips.contains(allowed_ip) {
							warn!(%allowed_ip, old_peer = %other, new_peer = %public_key, "allowed IP moved to a different peer");
							peer.allowed_ips.retain(|ip| ip != allowed_ip);
						}
					}
					state.peers.insert(
						*public_key,
						DevicePeer {
							preshared_key: preshared_key.clone(),
							allowed_ips: vec![*allowed_ip],
						},
					);
					debug!(peer = %public_key, %allowed_ip, "peer configured");
				}
				PeerChange::Remove { public_key } => {
					if state.peers.remove(public_key).is_some() {
						debug!(peer = %public_key, "peer removed");
					}
				}
			}
		}

		Ok(())
	}
}
