// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turns propagation events into device changes.

use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;
use wired_wgtunnel_common::{host_route, PeerAction, PropagationEvent, WgPresharedKey, WgPublicKey};

use crate::device::PeerChange;

/// The lease each peer key is currently bound to, as last announced.
#[derive(Debug, Default)]
pub struct PeerTable {
	bindings: HashMap<WgPublicKey, (IpAddr, WgPresharedKey)>,
}

impl PeerTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the device change for `event`, or `None` for a DEL that names
	/// a lease the key has since moved away from. Such a DEL is a late
	/// reclaim of an older lease and must not tear down the current one.
	pub fn change_for(&mut self, event: &PropagationEvent) -> Option<PeerChange> {
		match event.action {
			PeerAction::Add => {
				self.bindings
					.insert(event.public_key, (event.ip, event.preshared_key.clone()));
				Some(PeerChange::Upsert {
					public_key: event.public_key,
					preshared_key: event.preshared_key.clone(),
					allowed_ip: host_route(event.ip),
				})
			}
			PeerAction::Del => match self.bindings.get(&event.public_key) {
				Some((ip, psk)) if *ip != event.ip || *psk != event.preshared_key => {
					debug!(peer = %event.public_key, stale_ip = %event.ip, current_ip = %ip, "ignoring DEL for superseded lease");
					None
				}
				_ => {
					self.bindings.remove(&event.public_key);
					Some(PeerChange::Remove {
						public_key: event.public_key,
					})
				}
			},
		}
	}

	pub fn len(&self) -> usize {
		self.bindings.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bindings.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wired_wgtunnel_common::WgKeyPair;

	fn event(action: PeerAction, ip: &str, key: WgPublicKey, psk: &WgPresharedKey) -> PropagationEvent {
		PropagationEvent {
			action,
			ip: ip.parse().unwrap(),
			public_key: key,
			preshared_key: psk.clone(),
			uid: "alice".to_string(),
		}
	}

	#[test]
	fn add_configures_a_host_route() {
		let mut table = PeerTable::new();
		let key = *WgKeyPair::generate().unwrap().public_key();
		let psk = WgPresharedKey::generate().unwrap();

		let change = table.change_for(&event(PeerAction::Add, "10.100.0.2", key, &psk));
		assert_eq!(
			change,
			Some(PeerChange::Upsert {
				public_key: key,
				preshared_key: psk,
				allowed_ip: "10.100.0.2/32".parse().unwrap(),
			})
		);
		assert_eq!(table.len(), 1);
	}

	#[test]
	fn rotation_removes_then_adds() {
		let mut table = PeerTable::new();
		let key = *WgKeyPair::generate().unwrap().public_key();
		let old = WgPresharedKey::generate().unwrap();
		let new = WgPresharedKey::generate().unwrap();

		table.change_for(&event(PeerAction::Add, "10.100.0.2", key, &old));
		let del = table.change_for(&event(PeerAction::Del, "10.100.0.2", key, &old));
		assert_eq!(del, Some(PeerChange::Remove { public_key: key }));
		let add = table.change_for(&event(PeerAction::Add, "10.100.0.3", key, &new));
		assert!(matches!(add, Some(PeerChange::Upsert { .. })));
	}

	#[test]
	fn late_del_for_older_lease_is_ignored() {
		let mut table = PeerTable::new();
		let key = *WgKeyPair::generate().unwrap().public_key();
		let old = WgPresharedKey::generate().unwrap();
		let new = WgPresharedKey::generate().unwrap();

		table.change_for(&event(PeerAction::Add, "10.100.0.2", key, &old));
		table.change_for(&event(PeerAction::Add, "10.100.0.2", key, &new));

		assert_eq!(table.change_for(&event(PeerAction::Del, "10.100.0.2", key, &old)), None);
		assert_eq!(table.len(), 1);
		assert!(table
			.change_for(&event(PeerAction::Del, "10.100.0.2", key, &new))
			.is_some());
		assert!(table.is_empty());
	}

	#[test]
	fn del_for_unknown_peer_still_removes() {
		let mut table = PeerTable::new();
		let key = *WgKeyPair::generate().unwrap().public_key();
		let psk = WgPresharedKey::generate().unwrap();
		assert_eq!(
			table.change_for(&event(PeerAction::Del, "10.100.0.9", key, &psk)),
			Some(PeerChange::Remove { public_key: key })
		);
	}
}
