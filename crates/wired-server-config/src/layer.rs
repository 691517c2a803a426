// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{
	GatewayAgentConfigLayer, GroupsConfigLayer, HttpConfigLayer, LeaseConfigLayer, LoggingConfigLayer,
	StoreConfigLayer,
};

/// One source's partial view of the configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub lease: Option<LeaseConfigLayer>,
	#[serde(default)]
	pub store: Option<StoreConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
	#[serde(default)]
	pub http: Option<HttpConfigLayer>,
	#[serde(default)]
	pub groups: Option<GroupsConfigLayer>,
	#[serde(default)]
	pub gateways: Option<Vec<GatewayAgentConfigLayer>>,
}

impl ServerConfigLayer {
	/// Overlays `other` on top of `self`. The gateway list is replaced as a
	/// whole rather than merged entry by entry.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_section(&mut self.lease, other.lease, LeaseConfigLayer::merge);
		merge_section(&mut self.store, other.store, StoreConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
		merge_section(&mut self.http, other.http, HttpConfigLayer::merge);
		merge_section(&mut self.groups, other.groups, GroupsConfigLayer::merge);
		if other.gateways.is_some() {
			self.gateways = other.gateways;
		}
	}
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(base), Some(other)) => merge(base, other),
		(None, Some(other)) => *base = Some(other),
		(_, None) => {}
	}
}
