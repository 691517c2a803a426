// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::instrument;

use crate::error::Result;
use crate::hub::{ChannelHub, Subscription};
use crate::record::{glob_match, KeyTtl, Record};
use crate::LeaseStore;

fn far_future(now: Instant) -> Instant {
	now + Duration::from_secs(86_400 * 365 * 30)
}

struct Entry {
	record: Record,
	expires_at: Option<Instant>,
}

impl Entry {
	fn is_live(&self, now: Instant) -> bool {
		self.expires_at.map_or(true, |deadline| deadline > now)
	}
}

#[derive(Default)]
struct Inner {
	records: HashMap<String, Entry>,
	sets: HashMap<String, BTreeSet<String>>,
}

impl Inner {
	fn live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
		if self.records.get(key).is_some_and(|e| !e.is_live(now)) {
			self.records.remove(key);
		}
		self.records.get(key)
	}
}

/// Lease store kept entirely in process memory.
///
/// Expiry follows `tokio::time`, so tests can drive it with a paused clock.
#[derive(Clone, Default)]
pub struct MemoryLeaseStore {
	inner: Arc<RwLock<Inner>>,
	hub: ChannelHub,
}

impl MemoryLeaseStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn hub(&self) -> &ChannelHub {
		&self.hub
	}
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
	#[instrument(skip(self))]
	async fn get_record(&self, key: &str) -> Result<Option<Record>> {
		let mut inner = self.inner.write().await;
		Ok(inner.live(key, Instant::now()).map(|e| e.record.clone()))
	}

	#[instrument(skip(self, record))]
	async fn put_record(&self, key: &str, record: &Record, ttl: Option<Duration>) -> Result<()> {
		let now = Instant::now();
		let expires_at = ttl.map(|ttl| now.checked_add(ttl).unwrap_or_else(|| far_future(now)));
		let mut inner = self.inner.write().await;
		inner.records.insert(
			key.to_string(),
			Entry {
				record: record.clone(),
				expires_at,
			},
		);
		Ok(())
	}

	#[instrument(skip(self))]
	async fn delete(&self, key: &str) -> Result<bool> {
		let mut inner = self.inner.write().await;
		let now = Instant::now();
		Ok(inner.records.remove(key).is_some_and(|e| e.is_live(now)))
	}

	#[instrument(skip(self))]
	async fn ttl(&self, key: &str) -> Result<KeyTtl> {
		let now = Instant::now();
		let mut inner = self.inner.write().await;
		Ok(match inner.live(key, now) {
			None => KeyTtl::Missing,
			Some(Entry {
				expires_at: None, ..
			}) => KeyTtl::Persistent,
			Some(Entry {
				expires_at: Some(deadline),
				..
			}) => KeyTtl::Expires(deadline.saturating_duration_since(now)),
		})
	}

	#[instrument(skip(self))]
	async fn set_add(&self, set: &str, member: &str) -> Result<bool> {
		let mut inner = self.inner.write().await;
		Ok(inner
			.sets
			.entry(set.to_string())
			.or_default()
			.insert(member.to_string()))
	}

	#[instrument(skip(self))]
	async fn set_remove(&self, set: &str, member: &str) -> Result<bool> {
		let mut inner = self.inner.write().await;
		let Some(members) = inner.sets.get_mut(set) else {
			return Ok(false);
		};
		let removed = members.remove(member);
		if members.is_empty() {
			inner.sets.remove(set);
		}
		Ok(removed)
	}

	#[instrument(skip(self))]
	async fn set_members(&self, set: &str) -> Result<Vec<String>> {
		let inner = self.inner.read().await;
		Ok(inner
			.sets
			.get(set)
			.map(|members| members.iter().cloned().collect())
			.unwrap_or_default())
	}

	#[instrument(skip(self))]
	async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
		let now = Instant::now();
		let mut inner = self.inner.write().await;
		inner.records.retain(|_, e| e.is_live(now));

		let mut keys: Vec<String> = inner
			.records
			.keys()
			.chain(inner.sets.keys())
			.filter(|key| glob_match(pattern, key))
			.cloned()
			.collect();
		keys.sort();
		Ok(keys)
	}

	async fn publish(&self, channel: &str, message: String) -> Result<usize> {
		Ok(self.hub.publish(channel, message).await)
	}

	async fn subscribe(&self, channel: &str) -> Result<Subscription> {
		Ok(self.hub.subscribe(channel).await)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(ip: &str) -> Record {
		Record::from([("ip".to_string(), ip.to_string())])
	}

	#[tokio::test(start_paused = true)]
	async fn records_expire_with_the_clock() {
		let store = MemoryLeaseStore::new();
		store
			.put_record("lease:wg0:alice", &record("10.0.0.2"), Some(Duration::from_secs(60)))
			.await
			.unwrap();

		tokio::time::advance(Duration::from_secs(59)).await;
		assert_eq!(
			store.ttl("lease:wg0:alice").await.unwrap(),
			KeyTtl::Expires(Duration::from_secs(1))
		);
		assert!(store.get_record("lease:wg0:alice").await.unwrap().is_some());

		tokio::time::advance(Duration::from_secs(1)).await;
		assert_eq!(store.ttl("lease:wg0:alice").await.unwrap(), KeyTtl::Missing);
		assert!(store.get_record("lease:wg0:alice").await.unwrap().is_none());
		assert!(!store.delete("lease:wg0:alice").await.unwrap());
	}

	#[tokio::test]
	async fn persistent_records_have_no_ttl() {
		let store = MemoryLeaseStore::new();
		store.put_record("gateway:wg0", &record("10.0.0.1"), None).await.unwrap();
		assert_eq!(store.ttl("gateway:wg0").await.unwrap(), KeyTtl::Persistent);
		assert!(store.delete("gateway:wg0").await.unwrap());
		assert_eq!(store.ttl("gateway:wg0").await.unwrap(), KeyTtl::Missing);
	}

	#[tokio::test]
	async fn put_replaces_whole_record() {
		let store = MemoryLeaseStore::new();
		let mut first = record("10.0.0.2");
		first.insert("extra".to_string(), "x".to_string());
		store.put_record("k", &first, None).await.unwrap();
		store.put_record("k", &record("10.0.0.3"), None).await.unwrap();
		assert_eq!(store.get_record("k").await.unwrap(), Some(record("10.0.0.3")));
	}

	#[tokio::test]
	async fn set_add_is_a_claim() {
		let store = MemoryLeaseStore::new();
		assert!(store.set_add("ips:wg0", "10.0.0.2").await.unwrap());
		assert!(!store.set_add("ips:wg0", "10.0.0.2").await.unwrap());
		assert!(store.set_remove("ips:wg0", "10.0.0.2").await.unwrap());
		assert!(!store.set_remove("ips:wg0", "10.0.0.2").await.unwrap());
		assert!(store.set_members("ips:wg0").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn concurrent_claims_have_one_winner() {
		let store = MemoryLeaseStore::new();
		let mut handles = Vec::new();
		for _ in 0..16 {
			let store = store.clone();
			handles.push(tokio::spawn(async move { store.set_add("ips:wg0", "10.0.0.2").await.unwrap() }));
		}
		let mut winners = 0;
		for handle in handles {
			if handle.await.unwrap() {
				winners += 1;
			}
		}
		assert_eq!(winners, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn list_keys_skips_expired_records() {
		let store = MemoryLeaseStore::new();
		store
			.put_record("lease:wg0:alice", &record("10.0.0.2"), Some(Duration::from_secs(5)))
			.await
			.unwrap();
		store
			.put_record("lease:wg0:bob", &record("10.0.0.3"), Some(Duration::from_secs(60)))
			.await
			.unwrap();
		store.put_record("lease:wg1:carol", &record("10.0.1.2"), None).await.unwrap();
		store.set_add("peers:wg0", "x").await.unwrap();

		assert_eq!(
			store.list_keys_matching("lease:wg0:*").await.unwrap(),
			vec!["lease:wg0:alice", "lease:wg0:bob"]
		);

		tokio::time::advance(Duration::from_secs(5)).await;
		assert_eq!(store.list_keys_matching("lease:wg0:*").await.unwrap(), vec!["lease:wg0:bob"]);
		assert_eq!(store.list_keys_matching("peers:*").await.unwrap(), vec!["peers:wg0"]);
	}

	#[tokio::test]
	async fn pubsub_goes_through_the_hub() {
		let store = MemoryLeaseStore::new();
		let mut sub = store.subscribe("wg0").await.unwrap();
		assert_eq!(store.publish("wg0", "ADD x".to_string()).await.unwrap(), 1);
		assert_eq!(sub.recv().await.unwrap().as_deref(), Some("ADD x"));
	}
}
