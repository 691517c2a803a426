// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lease store adapter.
//!
//! The lifecycle engine talks to shared state only through [`LeaseStore`]:
//! expiring hash-like records, string sets used as indexes, key listing by
//! glob pattern, and publish/subscribe by channel name. Two backends are
//! provided, an in-memory one and a SQLite one, both sharing the
//! in-process [`ChannelHub`] for pub/sub.

pub mod error;
pub mod hub;
pub mod memory;
pub mod record;
pub mod sqlite;

use async_trait::async_trait;
use std::time::Duration;

pub use error::{Result, StoreError};
pub use hub::{ChannelHub, Subscription};
pub use memory::MemoryLeaseStore;
pub use record::{glob_match, KeyTtl, Record};
pub use sqlite::{create_pool, SqliteLeaseStore};

#[async_trait]
pub trait LeaseStore: Send + Sync {
	async fn get_record(&self, key: &str) -> Result<Option<Record>>;

	/// Replaces the record at `key`. `ttl: None` makes it persistent.
	async fn put_record(&self, key: &str, record: &Record, ttl: Option<Duration>) -> Result<()>;

	/// Returns whether a live key was removed.
	async fn delete(&self, key: &str) -> Result<bool>;

	async fn ttl(&self, key: &str) -> Result<KeyTtl>;

	/// Returns `true` only for the caller that inserted `member`, which makes
	/// it usable as an atomic claim.
	async fn set_add(&self, set: &str, member: &str) -> Result<bool>;

	/// Returns `true` only for the caller that removed `member`.
	async fn set_remove(&self, set: &str, member: &str) -> Result<bool>;

	async fn set_members(&self, set: &str) -> Result<Vec<String>>;

	/// Lists live record keys and non-empty set keys matching `pattern`
	/// (see [`glob_match`]).
	async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>>;

	/// Returns the number of subscribers that received the message.
	async fn publish(&self, channel: &str, message: String) -> Result<usize>;

	async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}
