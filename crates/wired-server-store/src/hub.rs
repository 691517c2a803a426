// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process publish/subscribe by channel name.
//!
//! Each channel is a `broadcast` channel, so every subscriber observes
//! messages in publish order. Delivery is at-most-once: a subscriber that
//! falls more than [`CHANNEL_CAPACITY`] messages behind loses the overflow
//! and is told so through [`StoreError::Lagged`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::instrument;

use crate::error::{Result, StoreError};

pub const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum HubMessage {
	Payload(String),
	Unsubscribed(u64),
}

#[derive(Clone, Default)]
pub struct ChannelHub {
	senders: Arc<RwLock<HashMap<String, broadcast::Sender<HubMessage>>>>,
	next_id: Arc<AtomicU64>,
}

impl ChannelHub {
	pub fn new() -> Self {
		Self::default()
	}

	#[instrument(skip(self))]
	pub async fn subscribe(&self, channel: &str) -> Subscription {
		let mut senders = self.senders.write().await;

		let rx = match senders.get(channel) {
			Some(sender) => sender.subscribe(),
			None => {
				let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
				senders.insert(channel.to_string(), tx);
				rx
			}
		};

		Subscription {
			id: self.next_id.fetch_add(1, Ordering::Relaxed),
			channel: channel.to_string(),
			rx,
			hub: self.clone(),
		}
	}

	/// Publishes `message` and returns how many subscribers received it.
	#[instrument(skip(self, message))]
	pub async fn publish(&self, channel: &str, message: String) -> usize {
		let delivered = {
			let senders = self.senders.read().await;
			match senders.get(channel) {
				Some(sender) => sender.send(HubMessage::Payload(message)).unwrap_or(0),
				None => return 0,
			}
		};

		if delivered == 0 {
			self.prune(channel).await;
		}
		delivered
	}

	async fn prune(&self, channel: &str) {
		let mut senders = self.senders.write().await;
		if senders
			.get(channel)
			.is_some_and(|sender| sender.receiver_count() == 0)
		{
			senders.remove(channel);
		}
	}

	async fn unsubscribe(&self, channel: &str, id: u64) {
		let senders = self.senders.read().await;
		if let Some(sender) = senders.get(channel) {
			let _ = sender.send(HubMessage::Unsubscribed(id));
		}
	}

	pub async fn subscriber_count(&self, channel: &str) -> usize {
		let senders = self.senders.read().await;
		senders.get(channel).map(|s| s.receiver_count()).unwrap_or(0)
	}
}

/// A live subscription to one channel.
pub struct Subscription {
	id: u64,
	channel: String,
	rx: broadcast::Receiver<HubMessage>,
	hub: ChannelHub,
}

impl Subscription {
	pub fn channel(&self) -> &str {
		&self.channel
	}

	/// Waits for the next message. `Ok(None)` means the channel is gone.
	pub async fn recv(&mut self) -> Result<Option<String>> {
		loop {
			match self.rx.recv().await {
				Ok(HubMessage::Payload(message)) => return Ok(Some(message)),
				Ok(HubMessage::Unsubscribed(_)) => continue,
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					return Err(StoreError::Lagged {
						channel: self.channel.clone(),
						skipped,
					});
				}
				Err(broadcast::error::RecvError::Closed) => return Ok(None),
			}
		}
	}

	/// Returns the next already-delivered message without waiting.
	pub fn try_recv(&mut self) -> Result<Option<String>> {
		use broadcast::error::TryRecvError;

		loop {
			match self.rx.try_recv() {
				Ok(HubMessage::Payload(message)) => return Ok(Some(message)),
				Ok(HubMessage::Unsubscribed(_)) => continue,
				Err(TryRecvError::Lagged(skipped)) => {
					return Err(StoreError::Lagged {
						channel: self.channel.clone(),
						skipped,
					});
				}
				Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(None),
			}
		}
	}

	/// Sends an unsubscribe notice and waits up to `grace` for it to come
	/// back through the channel, then drops the subscription regardless.
	/// Returns whether the notice was acknowledged in time.
	#[instrument(skip(self), fields(channel = %self.channel))]
	pub async fn close(mut self, grace: Duration) -> bool {
		self.hub.unsubscribe(&self.channel, self.id).await;

		let id = self.id;
		let rx = &mut self.rx;
		let acked = tokio::time::timeout(grace, async move {
			loop {
				match rx.recv().await {
					Ok(HubMessage::Unsubscribed(acked)) if acked == id => return true,
					Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
					Err(broadcast::error::RecvError::Closed) => return false,
				}
			}
		})
		.await
		.unwrap_or(false);

		if !acked {
			tracing::warn!("unsubscribe not acknowledged, forcing close");
		}

		let hub = self.hub.clone();
		let channel = self.channel.clone();
		drop(self);
		hub.prune(&channel).await;
		acked
	}
}
