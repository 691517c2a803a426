// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed view of the lease store.
//!
//! Per gateway `gw` the store holds:
//! - `lease:{gw}:{uid}`: the lease record, expiring after the lease ttl
//! - `peers:{gw}`: index set of JSON-encoded [`IndexEntry`] values
//! - `ips:{gw}`: the set of assigned addresses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use wired_server_store::{KeyTtl, LeaseStore, Record};
use wired_wgtunnel_common::{GatewayId, PeerAction, PropagationEvent, WgPresharedKey, WgPublicKey};

use crate::error::{Result, WgError};

pub fn lease_key(gateway: &GatewayId, uid: &str) -> String {
	format!("lease:{gateway}:{uid}")
}

pub fn lease_pattern(gateway: &GatewayId) -> String {
	format!("lease:{gateway}:*")
}

pub fn index_key(gateway: &GatewayId) -> String {
	format!("peers:{gateway}")
}

pub fn pool_key(gateway: &GatewayId) -> String {
	format!("ips:{gateway}")
}

mod psk_base64 {
	use super::*;

	pub fn serialize<S: Serializer>(psk: &WgPresharedKey, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		serializer.serialize_str(psk.to_base64().expose())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<WgPresharedKey, D::Error> {
		let s = String::deserialize(deserializer)?;
		WgPresharedKey::from_base64(&s).map_err(serde::de::Error::custom)
	}
}

/// A user's binding to a tunnel address and credential set on one gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
	pub uid: String,
	pub ip: IpAddr,
	pub public_key: WgPublicKey,
	pub preshared_key: WgPresharedKey,
	pub created_at: DateTime<Utc>,
}

impl Lease {
	fn to_record(&self) -> Record {
		Record::from([
			("ip".to_string(), self.ip.to_string()),
			("public_key".to_string(), self.public_key.to_base64()),
			("preshared_key".to_string(), self.preshared_key.to_base64().expose().clone()),
			("created_at".to_string(), self.created_at.to_rfc3339()),
		])
	}

	fn from_record(key: &str, uid: &str, record: &Record) -> Result<Self> {
		let field = |name: &str| {
			record.get(name).ok_or_else(|| WgError::CorruptRecord {
				key: key.to_string(),
				reason: format!("missing field {name}"),
			})
		};
		let corrupt = |reason: String| WgError::CorruptRecord {
			key: key.to_string(),
			reason,
		};

		Ok(Self {
			uid: uid.to_string(),
			ip: field("ip")?.parse().map_err(|_| corrupt("invalid ip".to_string()))?,
			public_key: WgPublicKey::from_base64(field("public_key")?).map_err(|e| corrupt(format!("public_key: {e}")))?,
			preshared_key: WgPresharedKey::from_base64(field("preshared_key")?)
				.map_err(|e| corrupt(format!("preshared_key: {e}")))?,
			created_at: DateTime::parse_from_rfc3339(field("created_at")?)
				.map(|dt| dt.with_timezone(&Utc))
				.map_err(|e| corrupt(format!("created_at: {e}")))?,
		})
	}

	pub fn index_entry(&self) -> IndexEntry {
		IndexEntry {
			uid: self.uid.clone(),
			ip: self.ip,
			public_key: self.public_key,
			preshared_key: self.preshared_key.clone(),
		}
	}
}

/// One member of a gateway's peer index: everything needed to add or remove
/// the peer on the gateway without reading the lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
	pub uid: String,
	pub ip: IpAddr,
	pub public_key: WgPublicKey,
	#[serde(with = "psk_base64")]
	pub preshared_key: WgPresharedKey,
}

impl IndexEntry {
	pub fn encode(&self) -> Result<String> {
		serde_json::to_string(self).map_err(|e| WgError::Internal(format!("encode index entry: {e}")))
	}

	pub fn decode(member: &str) -> std::result::Result<Self, serde_json::Error> {
		serde_json::from_str(member)
	}

	pub fn event(&self, action: PeerAction) -> PropagationEvent {
		PropagationEvent {
			action,
			ip: self.ip,
			public_key: self.public_key,
			preshared_key: self.preshared_key.clone(),
			uid: self.uid.clone(),
		}
	}

	/// Whether `lease` is the lease this entry was written for.
	pub fn describes(&self, lease: &Lease) -> bool {
		self.uid == lease.uid
			&& self.ip == lease.ip
			&& self.public_key == lease.public_key
			&& self.preshared_key == lease.preshared_key
	}
}

#[derive(Clone)]
pub struct LeaseRepository {
	store: Arc<dyn LeaseStore>,
}

impl LeaseRepository {
	pub fn new(store: Arc<dyn LeaseStore>) -> Self {
		Self { store }
	}

	#[instrument(skip(self), fields(%gateway))]
	pub async fn get_lease(&self, gateway: &GatewayId, uid: &str) -> Result<Option<Lease>> {
		let key = lease_key(gateway, uid);
		match self.store.get_record(&key).await? {
			Some(record) => Ok(Some(Lease::from_record(&key, uid, &record)?)),
			None => Ok(None),
		}
	}

	#[instrument(skip(self), fields(%gateway))]
	pub async fn lease_ttl(&self, gateway: &GatewayId, uid: &str) -> Result<KeyTtl> {
		Ok(self.store.ttl(&lease_key(gateway, uid)).await?)
	}

	#[instrument(skip(self, lease), fields(%gateway, uid = %lease.uid, ip = %lease.ip))]
	pub async fn put_lease(&self, gateway: &GatewayId, lease: &Lease, ttl: Duration) -> Result<()> {
		self.store
			.put_record(&lease_key(gateway, &lease.uid), &lease.to_record(), Some(ttl))
			.await?;
		Ok(())
	}

	#[instrument(skip(self), fields(%gateway))]
	pub async fn delete_lease(&self, gateway: &GatewayId, uid: &str) -> Result<bool> {
		Ok(self.store.delete(&lease_key(gateway, uid)).await?)
	}

	/// Uids with a live lease record on `gateway`.
	#[instrument(skip(self), fields(%gateway))]
	pub async fn live_uids(&self, gateway: &GatewayId) -> Result<HashSet<String>> {
		let prefix = format!("lease:{gateway}:");
		let keys = self.store.list_keys_matching(&lease_pattern(gateway)).await?;
		Ok(keys
			.into_iter()
			.filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
			.collect())
	}

	pub async fn add_index_entry(&self, gateway: &GatewayId, entry: &IndexEntry) -> Result<bool> {
		Ok(self.store.set_add(&index_key(gateway), &entry.encode()?).await?)
	}

	/// Returns `true` only when this call removed the entry.
	pub async fn remove_index_entry(&self, gateway: &GatewayId, entry: &IndexEntry) -> Result<bool> {
		self.remove_index_member(gateway, &entry.encode()?).await
	}

	pub async fn remove_index_member(&self, gateway: &GatewayId, member: &str) -> Result<bool> {
		Ok(self.store.set_remove(&index_key(gateway), member).await?)
	}

	/// Raw index members; callers decode them and decide what to do with
	/// undecodable ones.
	#[instrument(skip(self), fields(%gateway))]
	pub async fn index_members(&self, gateway: &GatewayId) -> Result<Vec<String>> {
		Ok(self.store.set_members(&index_key(gateway)).await?)
	}

	#[instrument(skip(self), fields(%gateway))]
	pub async fn used_ips(&self, gateway: &GatewayId) -> Result<HashSet<IpAddr>> {
		let members = self.store.set_members(&pool_key(gateway)).await?;
		let mut used = HashSet::with_capacity(members.len());
		for member in members {
			match member.parse() {
				Ok(ip) => {
					used.insert(ip);
				}
				Err(_) => tracing::warn!(%gateway, member, "ignoring unparseable pool member"),
			}
		}
		Ok(used)
	}

	/// Atomically claims `ip`. Returns `false` when someone else holds it.
	#[instrument(skip(self), fields(%gateway, %ip))]
	pub async fn claim_ip(&self, gateway: &GatewayId, ip: IpAddr) -> Result<bool> {
		Ok(self.store.set_add(&pool_key(gateway), &ip.to_string()).await?)
	}

	#[instrument(skip(self), fields(%gateway, %ip))]
	pub async fn release_ip(&self, gateway: &GatewayId, ip: IpAddr) -> Result<bool> {
		Ok(self.store.set_remove(&pool_key(gateway), &ip.to_string()).await?)
	}
}
