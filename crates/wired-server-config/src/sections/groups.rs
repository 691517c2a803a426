// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Which identity-provider groups each gateway serves.
//!
//! ```toml
//! [groups]
//! wg0 = ["engineering", "ops"]
//! wg1 = ["contractors"]
//! ```

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use wired_wgtunnel_common::GatewayId;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupsConfig {
	pub by_gateway: BTreeMap<GatewayId, Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct GroupsConfigLayer(pub BTreeMap<String, Vec<String>>);

impl GroupsConfigLayer {
	/// Gateways named in `other` replace their earlier group lists.
	pub fn merge(&mut self, other: GroupsConfigLayer) {
		self.0.extend(other.0);
	}

	pub fn finalize(self) -> Result<GroupsConfig, ConfigError> {
		let mut by_gateway = BTreeMap::new();
		let mut owners: HashMap<String, GatewayId> = HashMap::new();

		for (name, groups) in self.0 {
			let gateway = GatewayId::new(name.as_str()).map_err(|e| ConfigError::InvalidValue {
				key: format!("groups.{name}"),
				message: e.to_string(),
			})?;

			for group in &groups {
				if let Some(owner) = owners.insert(group.clone(), gateway.clone()) {
					return Err(ConfigError::Validation(format!(
						"group '{group}' is assigned to both {owner} and {gateway}"
					)));
				}
			}
			by_gateway.insert(gateway, groups);
		}

		Ok(GroupsConfig { by_gateway })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_and_finalize() {
		let layer: GroupsConfigLayer = toml::from_str(
			r#"
wg0 = ["engineering", "ops"]
wg1 = ["contractors"]
"#,
		)
		.unwrap();
		let config = layer.finalize().unwrap();
		let wg0 = GatewayId::new("wg0").unwrap();
		assert_eq!(config.by_gateway[&wg0], vec!["engineering", "ops"]);
		assert_eq!(config.by_gateway.len(), 2);
	}

	#[test]
	fn test_group_on_two_gateways_rejected() {
		let mut layer = GroupsConfigLayer::default();
		layer.0.insert("wg0".to_string(), vec!["eng".to_string()]);
		layer.0.insert("wg1".to_string(), vec!["eng".to_string()]);
		let err = layer.finalize().unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
	}

	#[test]
	fn test_invalid_interface_name_rejected() {
		let mut layer = GroupsConfigLayer::default();
		layer
			.0
			.insert("interface-name-too-long".to_string(), vec!["eng".to_string()]);
		assert!(matches!(
			layer.finalize().unwrap_err(),
			ConfigError::InvalidValue { .. }
		));
	}

	#[test]
	fn test_merge_replaces_per_gateway() {
		let mut base = GroupsConfigLayer::default();
		base.0.insert("wg0".to_string(), vec!["eng".to_string()]);
		base.0.insert("wg1".to_string(), vec!["ops".to_string()]);

		let mut overlay = GroupsConfigLayer::default();
		overlay.0.insert("wg0".to_string(), vec!["sales".to_string()]);
		base.merge(overlay);

		assert_eq!(base.0["wg0"], vec!["sales"]);
		assert_eq!(base.0["wg1"], vec!["ops"]);
	}
}
