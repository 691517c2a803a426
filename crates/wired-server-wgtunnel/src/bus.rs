// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use tracing::instrument;
use wired_server_store::{LeaseStore, Subscription};
use wired_wgtunnel_common::{GatewayId, PropagationEvent};

use crate::error::Result;

/// Publishes propagation events on each gateway's channel.
#[derive(Clone)]
pub struct PropagationBus {
	store: Arc<dyn LeaseStore>,
}

impl PropagationBus {
	pub fn new(store: Arc<dyn LeaseStore>) -> Self {
		Self { store }
	}

	#[instrument(skip(self, event), fields(%gateway, action = %event.action, uid = %event.uid))]
	pub async fn publish(&self, gateway: &GatewayId, event: &PropagationEvent) -> Result<usize> {
		let receivers = self.store.publish(gateway.channel(), event.encode()).await?;
		tracing::debug!(receivers, %event, "published propagation event");
		Ok(receivers)
	}

	/// Publishes the events of one rotation in order: a DEL for every torn
	/// down entry first, then the ADD for its replacement.
	pub async fn publish_rotation(
		&self,
		gateway: &GatewayId,
		removed: &[PropagationEvent],
		added: &PropagationEvent,
	) -> Result<()> {
		for event in removed {
			self.publish(gateway, event).await?;
		}
		self.publish(gateway, added).await?;
		Ok(())
	}

	pub async fn subscribe(&self, gateway: &GatewayId) -> Result<Subscription> {
		Ok(self.store.subscribe(gateway.channel()).await?)
	}
}
