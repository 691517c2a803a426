// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Peer lease lifecycle: issue, reuse, rotate, sweep and resync.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use wired_server_store::LeaseStore;
use wired_wgtunnel_common::{
	generate_credentials, is_valid_uid, GatewayId, PeerAction, PropagationEvent, WgPresharedKey, WgPrivateKey,
	WgPublicKey,
};

use crate::bus::PropagationBus;
use crate::config::LeaseConfig;
use crate::error::{Result, WgError};
use crate::leases::{IndexEntry, Lease, LeaseRepository};
use crate::registry::{GatewayDescriptor, GatewayRegistry};

/// Rescans after a lost address claim before giving up.
const MAX_CLAIM_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
	/// The stored lease was returned unchanged.
	Reused,
	/// No prior lease existed; a new one was written.
	Issued,
	/// A prior lease was torn down and replaced.
	Rotated,
}

#[derive(Debug, Clone)]
pub struct IssuedLease {
	pub lease: Lease,
	pub descriptor: GatewayDescriptor,
	pub outcome: LeaseOutcome,
	/// Set only when the caller presented no usable public key and the
	/// keypair was minted here. It is not stored anywhere.
	pub private_key: Option<WgPrivateKey>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
	pub reclaimed: usize,
	pub live: usize,
	pub skipped: usize,
}

/// Serializes work on one `(gateway, uid)` inside this process.
#[derive(Default)]
struct UidLocks {
	locks: Mutex<HashMap<(GatewayId, String), Arc<Mutex<()>>>>,
}

impl UidLocks {
	async fn lock(&self, gateway: &GatewayId, uid: &str) -> OwnedMutexGuard<()> {
		let lock = {
			let mut locks = self.locks.lock().await;
			locks.retain(|_, lock| Arc::strong_count(lock) > 1);
			locks
				.entry((gateway.clone(), uid.to_string()))
				.or_default()
				.clone()
		};
		lock.lock_owned().await
	}
}

/// Undo log for a rotation in progress.
#[derive(Default)]
struct Undo {
	removed_entries: Vec<IndexEntry>,
	released_ips: Vec<IpAddr>,
	claimed_ip: Option<IpAddr>,
	lease_written: bool,
	previous: Option<(Lease, Duration)>,
}

pub struct LeaseEngine {
	repo: LeaseRepository,
	bus: PropagationBus,
	registry: GatewayRegistry,
	config: LeaseConfig,
	locks: UidLocks,
}

impl LeaseEngine {
	pub fn new(store: Arc<dyn LeaseStore>, config: LeaseConfig) -> Self {
		Self {
			repo: LeaseRepository::new(store.clone()),
			bus: PropagationBus::new(store.clone()),
			registry: GatewayRegistry::new(store),
			config,
			locks: UidLocks::default(),
		}
	}

	pub fn config(&self) -> &LeaseConfig {
		&self.config
	}

	pub fn registry(&self) -> &GatewayRegistry {
		&self.registry
	}

	pub fn bus(&self) -> &PropagationBus {
		&self.bus
	}

	pub fn repository(&self) -> &LeaseRepository {
		&self.repo
	}

	/// Returns the caller's lease on `gateway`, issuing or rotating it when
	/// there is none, it is close to expiry, or `presented` differs from the
	/// stored public key. `presented: None` always rotates and mints a
	/// keypair for the caller.
	#[instrument(skip(self, presented), fields(%gateway, %uid))]
	pub async fn handle_request(
		&self,
		gateway: &GatewayId,
		uid: &str,
		presented: Option<WgPublicKey>,
	) -> Result<IssuedLease> {
		if !is_valid_uid(uid) {
			return Err(WgError::InvalidUid(uid.escape_debug().to_string()));
		}
		let _guard = self.locks.lock(gateway, uid).await;
		let descriptor = self.registry.require(gateway).await?;

		let existing = match self.repo.get_lease(gateway, uid).await {
			Ok(lease) => lease,
			Err(WgError::CorruptRecord { key, reason }) => {
				warn!(%key, %reason, "discarding corrupt lease record");
				None
			}
			Err(e) => return Err(e),
		};
		let remaining = self.repo.lease_ttl(gateway, uid).await?.remaining();

		if let (Some(lease), Some(presented), Some(remaining)) = (&existing, presented, remaining) {
			if lease.public_key == presented
				&& remaining >= self.config.min_ttl()
				&& descriptor.pool().is_host(lease.ip)
			{
				debug!(ip = %lease.ip, ?remaining, "reusing lease");
				return Ok(IssuedLease {
					lease: lease.clone(),
					descriptor,
					outcome: LeaseOutcome::Reused,
					private_key: None,
				});
			}
		}

		let previous = match (existing, remaining) {
			(Some(lease), Some(remaining)) => Some((lease, remaining)),
			_ => None,
		};
		self.rotate(gateway, descriptor, uid, previous, presented).await
	}

	async fn rotate(
		&self,
		gateway: &GatewayId,
		descriptor: GatewayDescriptor,
		uid: &str,
		previous: Option<(Lease, Duration)>,
		presented: Option<WgPublicKey>,
	) -> Result<IssuedLease> {
		let (public_key, private_key, preshared_key) = match presented {
			Some(public_key) => (public_key, None, WgPresharedKey::generate()?),
			None => {
				let credentials = generate_credentials()?;
				(
					*credentials.keypair.public_key(),
					Some(credentials.keypair.private_key().clone()),
					credentials.preshared_key,
				)
			}
		};
		let outcome = if previous.is_some() {
			LeaseOutcome::Rotated
		} else {
			LeaseOutcome::Issued
		};

		let mut undo = Undo {
			previous,
			..Undo::default()
		};

		let lease = match self
			.write_rotation(gateway, &descriptor, uid, public_key, preshared_key, &mut undo)
			.await
		{
			Ok(lease) => lease,
			Err(e) => {
				warn!(error = %e, "rotation aborted");
				self.roll_back(gateway, uid, undo).await;
				return Err(e);
			}
		};

		// Committed. A failed publish is reported to the caller but the new
		// lease stands; the next resync delivers it.
		let removed: Vec<PropagationEvent> = undo
			.removed_entries
			.iter()
			.map(|entry| entry.event(PeerAction::Del))
			.collect();
		self.bus
			.publish_rotation(gateway, &removed, &lease.index_entry().event(PeerAction::Add))
			.await?;

		info!(
			ip = %lease.ip,
			public_key = %lease.public_key,
			torn_down = undo.removed_entries.len(),
			?outcome,
			"lease written"
		);

		Ok(IssuedLease {
			lease,
			descriptor,
			outcome,
			private_key,
		})
	}

	async fn write_rotation(
		&self,
		gateway: &GatewayId,
		descriptor: &GatewayDescriptor,
		uid: &str,
		public_key: WgPublicKey,
		preshared_key: WgPresharedKey,
		undo: &mut Undo,
	) -> Result<Lease> {
		// Every index entry of this uid goes, including leftovers of leases
		// that expired before the sweep got to them.
		for entry in self.entries_for_uid(gateway, uid).await? {
			if self.repo.remove_index_entry(gateway, &entry).await? {
				let ip = entry.ip;
				undo.removed_entries.push(entry);
				if self.repo.release_ip(gateway, ip).await? {
					undo.released_ips.push(ip);
				}
			}
		}

		let ip = self.claim_address(gateway, descriptor).await?;
		undo.claimed_ip = Some(ip);

		let lease = Lease {
			uid: uid.to_string(),
			ip,
			public_key,
			preshared_key,
			created_at: Utc::now(),
		};
		undo.lease_written = true;
		self.repo.put_lease(gateway, &lease, self.config.ttl()).await?;
		self.repo.add_index_entry(gateway, &lease.index_entry()).await?;

		Ok(lease)
	}

	async fn claim_address(&self, gateway: &GatewayId, descriptor: &GatewayDescriptor) -> Result<IpAddr> {
		let pool = descriptor.pool();
		for _ in 0..MAX_CLAIM_ATTEMPTS {
			let mut used = self.repo.used_ips(gateway).await?;
			used.extend(descriptor.reserved_address());

			let ip = pool
				.allocate(&used)
				.map_err(|_| WgError::ExhaustedPool(gateway.clone()))?;
			if self.repo.claim_ip(gateway, ip).await? {
				return Ok(ip);
			}
			debug!(%ip, "address claimed concurrently, rescanning");
		}
		Err(WgError::Internal(format!(
			"no address claimed after {MAX_CLAIM_ATTEMPTS} attempts"
		)))
	}

	/// Best effort: put the store back the way the rotation found it.
	///
	/// An address released by the rotation may have been claimed by another
	/// uid before the rollback runs. Such an address is not taken back: the
	/// entry that held it stays removed, the previous lease record is
	/// deleted and its peer is withdrawn with a DEL.
	async fn roll_back(&self, gateway: &GatewayId, uid: &str, undo: Undo) {
		if let Some(ip) = undo.claimed_ip {
			if let Err(e) = self.repo.release_ip(gateway, ip).await {
				warn!(%ip, error = %e, "rollback: failed to release claimed address");
			}
		}

		let mut reclaimed: HashSet<IpAddr> = HashSet::new();
		let mut lost = Vec::new();
		for entry in undo.removed_entries {
			let held = if undo.released_ips.contains(&entry.ip) && !reclaimed.contains(&entry.ip) {
				self.repo.claim_ip(gateway, entry.ip).await
			} else {
				Ok(true)
			};

			match held {
				Ok(true) => {
					reclaimed.insert(entry.ip);
					if let Err(e) = self.repo.add_index_entry(gateway, &entry).await {
						warn!(ip = %entry.ip, error = %e, "rollback: failed to restore index entry");
					}
				}
				Ok(false) => {
					warn!(ip = %entry.ip, "rollback: address taken by another lease, withdrawing entry");
					lost.push(entry);
				}
				Err(e) => {
					warn!(ip = %entry.ip, error = %e, "rollback: failed to reclaim address");
					lost.push(entry);
				}
			}
		}

		let previous_lost = undo
			.previous
			.as_ref()
			.is_some_and(|(lease, _)| lost.iter().any(|entry| entry.describes(lease)));
		let restored = match &undo.previous {
			_ if previous_lost => self.repo.delete_lease(gateway, uid).await.map(|_| ()),
			Some((lease, remaining)) if undo.lease_written => self.repo.put_lease(gateway, lease, *remaining).await,
			None if undo.lease_written => self.repo.delete_lease(gateway, uid).await.map(|_| ()),
			_ => Ok(()),
		};
		if let Err(e) = restored {
			warn!(error = %e, "rollback: failed to restore lease record");
		}

		for entry in &lost {
			if let Err(e) = self.bus.publish(gateway, &entry.event(PeerAction::Del)).await {
				warn!(ip = %entry.ip, error = %e, "rollback: failed to withdraw entry");
			}
		}
	}

	async fn entries_for_uid(&self, gateway: &GatewayId, uid: &str) -> Result<Vec<IndexEntry>> {
		let members = self.repo.index_members(gateway).await?;
		Ok(members
			.iter()
			.filter_map(|member| IndexEntry::decode(member).ok())
			.filter(|entry| entry.uid == uid)
			.collect())
	}

	/// Whether `entry` describes the live lease of its uid.
	async fn is_current(&self, gateway: &GatewayId, entry: &IndexEntry) -> Result<bool> {
		match self.repo.get_lease(gateway, &entry.uid).await {
			Ok(Some(lease)) => Ok(entry.describes(&lease)),
			Ok(None) | Err(WgError::CorruptRecord { .. }) => Ok(false),
			Err(e) => Err(e),
		}
	}

	/// Reclaims every index entry of `gateway` whose lease has expired or
	/// been superseded: frees its address, drops the entry and emits DEL.
	#[instrument(skip(self), fields(%gateway))]
	pub async fn sweep(&self, gateway: &GatewayId) -> Result<SweepReport> {
		// Index before keys: an entry added after this read is not judged
		// against a key listing taken before its lease existed.
		let members = self.repo.index_members(gateway).await?;
		let live = self.repo.live_uids(gateway).await?;
		let mut report = SweepReport::default();

		for member in members {
			let entry = match IndexEntry::decode(&member) {
				Ok(entry) => entry,
				Err(e) => {
					warn!(error = %e, "skipping undecodable index entry");
					report.skipped += 1;
					continue;
				}
			};

			if live.contains(&entry.uid) && self.is_current(gateway, &entry).await? {
				report.live += 1;
				continue;
			}

			let _guard = self.locks.lock(gateway, &entry.uid).await;
			if self.is_current(gateway, &entry).await? {
				report.live += 1;
				continue;
			}
			if !self.repo.remove_index_member(gateway, &member).await? {
				// Reclaimed by a concurrent rotation or sweep.
				continue;
			}
			self.repo.release_ip(gateway, entry.ip).await?;
			self.bus.publish(gateway, &entry.event(PeerAction::Del)).await?;

			info!(uid = %entry.uid, ip = %entry.ip, public_key = %entry.public_key, "reclaimed expired lease");
			report.reclaimed += 1;
		}

		Ok(report)
	}

	/// Replays every valid lease of `gateway` as ADD.
	#[instrument(skip(self), fields(%gateway))]
	pub async fn resync(&self, gateway: &GatewayId) -> Result<usize> {
		let pool = self.registry.get(gateway).await?.map(|d| d.pool());
		let members = self.repo.index_members(gateway).await?;
		let live = self.repo.live_uids(gateway).await?;
		let mut replayed = 0;

		for member in members {
			let Ok(entry) = IndexEntry::decode(&member) else {
				continue;
			};
			if !live.contains(&entry.uid) || !self.is_current(gateway, &entry).await? {
				continue;
			}
			if pool.is_some_and(|pool| !pool.is_host(entry.ip)) {
				debug!(ip = %entry.ip, "not replaying lease outside the registered subnet");
				continue;
			}
			self.bus.publish(gateway, &entry.event(PeerAction::Add)).await?;
			replayed += 1;
		}

		info!(replayed, "resync complete");
		Ok(replayed)
	}
}
