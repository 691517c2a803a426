// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registered gateways, keyed by interface name.
//!
//! A descriptor is written whole on every registration and never edited in
//! place.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::instrument;
use wired_server_store::{LeaseStore, Record};
use wired_wgtunnel_common::{GatewayId, GatewayRegistration, IpPool, WgPublicKey};

use crate::error::{Result, WgError};

pub fn gateway_key(gateway: &GatewayId) -> String {
	format!("gateway:{gateway}")
}

const GATEWAY_PATTERN: &str = "gateway:*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayDescriptor {
	pub registration: GatewayRegistration,
	pub groups: Vec<String>,
	pub registered_at: DateTime<Utc>,
}

impl GatewayDescriptor {
	pub fn id(&self) -> &GatewayId {
		&self.registration.interface
	}

	pub fn pool(&self) -> IpPool {
		IpPool::new(self.registration.network)
	}

	/// The gateway's own tunnel address when it lies inside the client pool.
	pub fn reserved_address(&self) -> Option<IpAddr> {
		let addr = self.registration.gateway_address();
		self.pool().is_host(addr).then_some(addr)
	}

	fn to_record(&self) -> Result<Record> {
		let r = &self.registration;
		Ok(Record::from([
			("interface".to_string(), r.interface.to_string()),
			("endpoint".to_string(), r.endpoint.clone()),
			("port".to_string(), r.port.to_string()),
			("public_key".to_string(), r.public_key.to_base64()),
			("network".to_string(), r.network.to_string()),
			("allowed_ips".to_string(), json(&r.allowed_ips)?),
			("dns".to_string(), json(&r.dns)?),
			("groups".to_string(), json(&self.groups)?),
			("registered_at".to_string(), self.registered_at.to_rfc3339()),
		]))
	}

	fn from_record(key: &str, record: &Record) -> Result<Self> {
		let corrupt = |reason: String| WgError::CorruptRecord {
			key: key.to_string(),
			reason,
		};
		let field = |name: &str| {
			record
				.get(name)
				.map(String::as_str)
				.ok_or_else(|| corrupt(format!("missing field {name}")))
		};

		let interface = GatewayId::new(field("interface")?).map_err(|e| corrupt(e.to_string()))?;
		let port = field("port")?.parse().map_err(|_| corrupt("invalid port".to_string()))?;
		let public_key = WgPublicKey::from_base64(field("public_key")?).map_err(|e| corrupt(e.to_string()))?;
		let network: IpNet = field("network")?
			.parse()
			.map_err(|_| corrupt("invalid network".to_string()))?;
		let allowed_ips = serde_json::from_str(field("allowed_ips")?).map_err(|e| corrupt(e.to_string()))?;
		let dns = serde_json::from_str(field("dns")?).map_err(|e| corrupt(e.to_string()))?;
		let groups = serde_json::from_str(field("groups")?).map_err(|e| corrupt(e.to_string()))?;
		let registered_at = DateTime::parse_from_rfc3339(field("registered_at")?)
			.map(|dt| dt.with_timezone(&Utc))
			.map_err(|e| corrupt(e.to_string()))?;

		Ok(Self {
			registration: GatewayRegistration {
				interface,
				endpoint: field("endpoint")?.to_string(),
				port,
				public_key,
				network,
				allowed_ips,
				dns,
			},
			groups,
			registered_at,
		})
	}
}

fn json<T: serde::Serialize>(value: &T) -> Result<String> {
	serde_json::to_string(value).map_err(|e| WgError::Internal(format!("encode descriptor: {e}")))
}

#[derive(Clone)]
pub struct GatewayRegistry {
	store: Arc<dyn LeaseStore>,
}

impl GatewayRegistry {
	pub fn new(store: Arc<dyn LeaseStore>) -> Self {
		Self { store }
	}

	/// Replaces the descriptor for the registering gateway.
	#[instrument(skip(self, descriptor), fields(gateway = %descriptor.id()))]
	pub async fn put(&self, descriptor: &GatewayDescriptor) -> Result<()> {
		self.store
			.put_record(&gateway_key(descriptor.id()), &descriptor.to_record()?, None)
			.await?;
		Ok(())
	}

	#[instrument(skip(self), fields(%gateway))]
	pub async fn get(&self, gateway: &GatewayId) -> Result<Option<GatewayDescriptor>> {
		let key = gateway_key(gateway);
		match self.store.get_record(&key).await? {
			Some(record) => Ok(Some(GatewayDescriptor::from_record(&key, &record)?)),
			None => Ok(None),
		}
	}

	pub async fn require(&self, gateway: &GatewayId) -> Result<GatewayDescriptor> {
		self.get(gateway)
			.await?
			.ok_or_else(|| WgError::GatewayNotRegistered(gateway.clone()))
	}

	/// Interface names of every registered gateway.
	#[instrument(skip(self))]
	pub async fn list(&self) -> Result<Vec<GatewayId>> {
		let keys = self.store.list_keys_matching(GATEWAY_PATTERN).await?;
		Ok(keys
			.iter()
			.filter_map(|key| key.strip_prefix("gateway:"))
			.filter_map(|name| GatewayId::new(name).ok())
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wired_server_store::MemoryLeaseStore;
	use wired_wgtunnel_common::WgKeyPair;

	fn descriptor(interface: &str, network: &str) -> GatewayDescriptor {
		GatewayDescriptor {
			registration: GatewayRegistration {
				interface: GatewayId::new(interface).unwrap(),
				endpoint: "vpn.example.com".to_string(),
				port: 51820,
				public_key: *WgKeyPair::generate().unwrap().public_key(),
				network: network.parse().unwrap(),
				allowed_ips: vec!["10.0.0.0/8".parse().unwrap()],
				dns: vec!["10.0.0.53".parse().unwrap()],
			},
			groups: vec!["eng".to_string()],
			registered_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn put_get_roundtrip() {
		let registry = GatewayRegistry::new(Arc::new(MemoryLeaseStore::new()));
		let descriptor = descriptor("wg0", "10.100.0.1/24");
		registry.put(&descriptor).await.unwrap();

		let loaded = registry.get(descriptor.id()).await.unwrap().unwrap();
		assert_eq!(loaded, descriptor);
		assert_eq!(registry.list().await.unwrap(), vec![GatewayId::new("wg0").unwrap()]);
	}

	#[tokio::test]
	async fn reregistration_replaces_descriptor() {
		let registry = GatewayRegistry::new(Arc::new(MemoryLeaseStore::new()));
		registry.put(&descriptor("wg0", "10.100.0.1/24")).await.unwrap();
		let replacement = descriptor("wg0", "10.200.0.1/16");
		registry.put(&replacement).await.unwrap();

		let loaded = registry.require(replacement.id()).await.unwrap();
		assert_eq!(loaded.registration.network, replacement.registration.network);
		assert_eq!(loaded.registration.public_key, replacement.registration.public_key);
	}

	#[tokio::test]
	async fn missing_gateway_is_not_registered() {
		let registry = GatewayRegistry::new(Arc::new(MemoryLeaseStore::new()));
		let err = registry.require(&GatewayId::new("wg9").unwrap()).await.unwrap_err();
		assert!(matches!(err, WgError::GatewayNotRegistered(_)));
	}

	#[test]
	fn reserved_address_only_inside_pool() {
		assert_eq!(
			descriptor("wg0", "10.100.0.1/24").reserved_address(),
			Some("10.100.0.1".parse().unwrap())
		);
		assert_eq!(descriptor("wg0", "10.100.0.0/30").reserved_address(), None);
	}
}
