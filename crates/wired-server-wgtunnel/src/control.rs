// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Entry points used by the front door and by gateway agents.

use async_trait::async_trait;
use chrono::Utc;
use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use wired_wgtunnel_common::{
	GatewayId, GatewayRegistrar, GatewayRegistration, RegistrationError, WgPresharedKey, WgPrivateKey,
	WgPublicKey,
};

use crate::config::WgTunnelConfig;
use crate::engine::{IssuedLease, LeaseEngine, LeaseOutcome};
use crate::error::{Result, WgError};
use crate::registry::GatewayDescriptor;

/// Everything a client needs to bring its tunnel up.
#[derive(Debug, Clone)]
pub struct ResolvedTunnel {
	pub gateway: GatewayId,
	/// Client address with the subnet prefix, e.g. `10.100.0.2/24`.
	pub address: IpNet,
	pub gateway_public_key: WgPublicKey,
	pub preshared_key: WgPresharedKey,
	pub endpoint: String,
	pub port: u16,
	pub allowed_ips: Vec<IpNet>,
	pub dns: Vec<IpAddr>,
	pub outcome: LeaseOutcome,
	/// Present only when the server minted the client's keypair.
	pub private_key: Option<WgPrivateKey>,
}

#[derive(Clone)]
pub struct ControlPlane {
	engine: Arc<LeaseEngine>,
	config: Arc<WgTunnelConfig>,
}

impl ControlPlane {
	pub fn new(engine: Arc<LeaseEngine>, config: Arc<WgTunnelConfig>) -> Self {
		Self { engine, config }
	}

	pub fn engine(&self) -> &Arc<LeaseEngine> {
		&self.engine
	}

	/// Maps `group` to its gateway and issues or reuses the caller's lease
	/// there. An unparseable `presented` key is treated as absent.
	#[instrument(skip(self, presented), fields(%group, %uid))]
	pub async fn resolve(&self, group: &str, uid: &str, presented: Option<&str>) -> Result<ResolvedTunnel> {
		let gateway = self
			.config
			.gateway_for_group(group)
			.cloned()
			.ok_or_else(|| WgError::UnknownGroup(group.to_string()))?;

		let presented = presented.and_then(|key| match WgPublicKey::from_base64(key) {
			Ok(key) => Some(key),
			Err(e) => {
				warn!(error = %e, "presented public key unusable, rotating");
				None
			}
		});

		let issued = self.engine.handle_request(&gateway, uid, presented).await?;
		resolved(gateway, issued)
	}

	/// All gateways the sweeper should visit: configured and registered.
	pub async fn known_gateways(&self) -> Result<Vec<GatewayId>> {
		let mut seen: HashSet<GatewayId> = HashSet::new();
		let mut gateways = Vec::new();
		let registered = self.engine.registry().list().await?;
		for gateway in self.config.configured_gateways().cloned().chain(registered) {
			if seen.insert(gateway.clone()) {
				gateways.push(gateway);
			}
		}
		Ok(gateways)
	}

	#[instrument(skip(self, registration), fields(gateway = %registration.interface))]
	async fn register_gateway(&self, registration: GatewayRegistration) -> Result<usize> {
		let gateway = registration.interface.clone();
		let descriptor = GatewayDescriptor {
			groups: self.config.groups_for(&gateway),
			registration,
			registered_at: Utc::now(),
		};

		self.engine.registry().put(&descriptor).await?;
		info!(
			network = %descriptor.registration.network,
			endpoint = %descriptor.registration.endpoint,
			port = descriptor.registration.port,
			"gateway registered"
		);

		self.engine.resync(&gateway).await
	}
}

fn resolved(gateway: GatewayId, issued: IssuedLease) -> Result<ResolvedTunnel> {
	let registration = &issued.descriptor.registration;
	let address = issued
		.descriptor
		.pool()
		.with_prefix(issued.lease.ip)
		.map_err(|e| WgError::Internal(format!("leased address outside pool: {e}")))?;

	Ok(ResolvedTunnel {
		gateway,
		address,
		gateway_public_key: registration.public_key,
		preshared_key: issued.lease.preshared_key.clone(),
		endpoint: registration.endpoint.clone(),
		port: registration.port,
		allowed_ips: registration.allowed_ips.clone(),
		dns: registration.dns.clone(),
		outcome: issued.outcome,
		private_key: issued.private_key,
	})
}

#[async_trait]
impl GatewayRegistrar for ControlPlane {
	async fn register(&self, registration: GatewayRegistration) -> std::result::Result<(), RegistrationError> {
		let reserved: HashSet<IpAddr> = [registration.gateway_address()].into();
		if wired_wgtunnel_common::allocate(registration.network, &reserved).is_err() {
			return Err(RegistrationError::Rejected(format!(
				"network {} leaves no client addresses",
				registration.network
			)));
		}

		self.register_gateway(registration)
			.await
			.map(|_| ())
			.map_err(|e| RegistrationError::Unavailable(e.to_string()))
	}
}
