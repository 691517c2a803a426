// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable lease store on SQLite.
//!
//! Records are stored as JSON field maps with an absolute expiry in unix
//! milliseconds; expired rows are invisible to every read and are removed by
//! [`SqliteLeaseStore::purge_expired`]. Key listing uses SQLite `GLOB`, which
//! accepts `*` and `?` like the in-memory store and additionally `[...]`
//! classes.

use async_trait::async_trait;
use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

use crate::error::{Result, StoreError};
use crate::hub::{ChannelHub, Subscription};
use crate::record::{KeyTtl, Record};
use crate::LeaseStore;

/// Create a single-connection SqlitePool that owns the database file.
///
/// The connection runs in exclusive locking mode with WAL and is never
/// recycled, so the file stays locked for as long as the pool is open. A
/// second process opening the same file fails here instead of sharing
/// lease state it cannot see published.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./wired.db")
///
/// # Errors
/// Returns `StoreError::Internal` if the URL is invalid, or the driver error
/// if the connection fails or the file is held by another owner.
#[instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| StoreError::Internal(format!("Invalid database URL: {e}")))?
		.locking_mode(SqliteLockingMode::Exclusive)
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(Duration::ZERO)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.min_connections(1)
		.max_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect_with(options)
		.await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

fn now_millis() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> i64 {
	i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct SqliteLeaseStore {
	pool: SqlitePool,
	hub: ChannelHub,
}

impl SqliteLeaseStore {
	/// Wraps `pool`, creating the tables if they do not exist yet.
	pub async fn new(pool: SqlitePool, hub: ChannelHub) -> Result<Self> {
		let store = Self { pool, hub };
		store.migrate().await?;
		Ok(store)
	}

	/// Closes the pool and releases the database file.
	pub async fn close(&self) {
		self.pool.close().await;
	}

	async fn migrate(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS kv_records (
				key TEXT PRIMARY KEY,
				fields TEXT NOT NULL,
				expires_at INTEGER
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_records_expires_at ON kv_records (expires_at)")
			.execute(&self.pool)
			.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS kv_sets (
				set_key TEXT NOT NULL,
				member TEXT NOT NULL,
				PRIMARY KEY (set_key, member)
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	pub fn hub(&self) -> &ChannelHub {
		&self.hub
	}

	/// Deletes rows whose expiry has passed. Returns how many were removed.
	#[instrument(skip(self))]
	pub async fn purge_expired(&self) -> Result<u64> {
		let result = sqlx::query("DELETE FROM kv_records WHERE expires_at IS NOT NULL AND expires_at <= ?")
			.bind(now_millis())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
	#[instrument(skip(self))]
	async fn get_record(&self, key: &str) -> Result<Option<Record>> {
		let row: Option<(String,)> = sqlx::query_as(
			"SELECT fields FROM kv_records
			 WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
		)
		.bind(key)
		.bind(now_millis())
		.fetch_optional(&self.pool)
		.await?;

		row.map(|(fields,)| serde_json::from_str(&fields).map_err(StoreError::from))
			.transpose()
	}

	#[instrument(skip(self, record))]
	async fn put_record(&self, key: &str, record: &Record, ttl: Option<Duration>) -> Result<()> {
		let fields = serde_json::to_string(record)?;
		let expires_at = ttl.map(|ttl| now_millis().saturating_add(ttl_millis(ttl)));

		sqlx::query(
			"INSERT INTO kv_records (key, fields, expires_at) VALUES (?, ?, ?)
			 ON CONFLICT(key) DO UPDATE SET fields = excluded.fields, expires_at = excluded.expires_at",
		)
		.bind(key)
		.bind(fields)
		.bind(expires_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self))]
	async fn delete(&self, key: &str) -> Result<bool> {
		let row: Option<(Option<i64>,)> = sqlx::query_as("DELETE FROM kv_records WHERE key = ? RETURNING expires_at")
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;

		let now = now_millis();
		Ok(matches!(row, Some((expires_at,)) if expires_at.map_or(true, |at| at > now)))
	}

	#[instrument(skip(self))]
	async fn ttl(&self, key: &str) -> Result<KeyTtl> {
		let now = now_millis();
		let row: Option<(Option<i64>,)> = sqlx::query_as(
			"SELECT expires_at FROM kv_records
			 WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
		)
		.bind(key)
		.bind(now)
		.fetch_optional(&self.pool)
		.await?;

		Ok(match row {
			None => KeyTtl::Missing,
			Some((None,)) => KeyTtl::Persistent,
			Some((Some(at),)) => {
				KeyTtl::Expires(Duration::from_millis(u64::try_from(at - now).unwrap_or(0)))
			}
		})
	}

	#[instrument(skip(self))]
	async fn set_add(&self, set: &str, member: &str) -> Result<bool> {
		let result = sqlx::query("INSERT OR IGNORE INTO kv_sets (set_key, member) VALUES (?, ?)")
			.bind(set)
			.bind(member)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self))]
	async fn set_remove(&self, set: &str, member: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM kv_sets WHERE set_key = ? AND member = ?")
			.bind(set)
			.bind(member)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self))]
	async fn set_members(&self, set: &str) -> Result<Vec<String>> {
		let rows: Vec<(String,)> = sqlx::query_as("SELECT member FROM kv_sets WHERE set_key = ? ORDER BY member")
			.bind(set)
			.fetch_all(&self.pool)
			.await?;

		Ok(rows.into_iter().map(|(member,)| member).collect())
	}

	#[instrument(skip(self))]
	async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
		let rows: Vec<(String,)> = sqlx::query_as(
			"SELECT key FROM kv_records
			 WHERE key GLOB ? AND (expires_at IS NULL OR expires_at > ?)
			 UNION
			 SELECT DISTINCT set_key FROM kv_sets WHERE set_key GLOB ?
			 ORDER BY 1",
		)
		.bind(pattern)
		.bind(now_millis())
		.bind(pattern)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(|(key,)| key).collect())
	}

	async fn publish(&self, channel: &str, message: String) -> Result<usize> {
		Ok(self.hub.publish(channel, message).await)
	}

	async fn subscribe(&self, channel: &str) -> Result<Subscription> {
		Ok(self.hub.subscribe(channel).await)
	}
}
