// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Where an agent hears its gateway's propagation messages.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use wired_server_store::{LeaseStore, Subscription};
use wired_wgtunnel_common::GatewayId;

use crate::error::Result;

#[async_trait]
pub trait EventSource: Send + Sync {
	/// Opens a stream of wire lines for `gateway`. Every message published
	/// after this returns is delivered on the stream.
	async fn open(&self, gateway: &GatewayId) -> Result<Box<dyn EventStream>>;
}

#[async_trait]
pub trait EventStream: Send {
	/// `Ok(None)` means the source ended the stream.
	async fn next_line(&mut self) -> Result<Option<String>>;

	/// Releases the stream. Returns whether the source acknowledged the
	/// close within `grace`. Reading after a close yields `Ok(None)`.
	async fn close(&mut self, grace: Duration) -> bool;
}

/// Subscribes directly to a lease store's pub/sub channel. Only reaches a
/// control plane in the same process.
#[derive(Clone)]
pub struct StoreEventSource {
	store: Arc<dyn LeaseStore>,
}

impl StoreEventSource {
	pub fn new(store: Arc<dyn LeaseStore>) -> Self {
		Self { store }
	}
}

#[async_trait]
impl EventSource for StoreEventSource {
	async fn open(&self, gateway: &GatewayId) -> Result<Box<dyn EventStream>> {
		let subscription = self.store.subscribe(gateway.channel()).await?;
		Ok(Box::new(StoreStream(Some(subscription))))
	}
}

struct StoreStream(Option<Subscription>);

#[async_trait]
impl EventStream for StoreStream {
	async fn next_line(&mut self) -> Result<Option<String>> {
		match self.0.as_mut() {
			Some(subscription) => Ok(subscription.recv().await?),
			None => Ok(None),
		}
	}

	async fn close(&mut self, grace: Duration) -> bool {
		match self.0.take() {
			Some(subscription) => subscription.close(grace).await,
			None => true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wired_server_store::MemoryLeaseStore;

	#[tokio::test]
	async fn store_stream_delivers_then_closes() {
		let store = Arc::new(MemoryLeaseStore::new());
		let source = StoreEventSource::new(store.clone());
		let gateway = GatewayId::new("wg0").unwrap();

		let mut stream = source.open(&gateway).await.unwrap();
		assert_eq!(store.publish("wg0", "ADD line".to_string()).await.unwrap(), 1);
		assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("ADD line"));

		assert!(stream.close(Duration::from_secs(1)).await);
		assert_eq!(store.hub().subscriber_count("wg0").await, 0);
		assert_eq!(stream.next_line().await.unwrap(), None);
	}
}
