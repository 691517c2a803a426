// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::time::Duration;
use wired_wgtunnel_common::GatewayId;

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_MIN_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
	#[error("lease ttl must be greater than zero")]
	ZeroTtl,

	#[error("min ttl ({min_ttl:?}) must be shorter than the lease ttl ({ttl:?})")]
	MinTtlTooLong { ttl: Duration, min_ttl: Duration },

	#[error("sweep interval must be greater than zero")]
	ZeroSweepInterval,
}

/// Timing of the lease lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
	ttl: Duration,
	min_ttl: Duration,
	sweep_interval: Duration,
}

impl Default for LeaseConfig {
	fn default() -> Self {
		Self {
			ttl: DEFAULT_LEASE_TTL,
			min_ttl: DEFAULT_MIN_TTL,
			sweep_interval: DEFAULT_SWEEP_INTERVAL,
		}
	}
}

impl LeaseConfig {
	pub fn new(ttl: Duration, min_ttl: Duration, sweep_interval: Duration) -> Result<Self, ConfigError> {
		if ttl.is_zero() {
			return Err(ConfigError::ZeroTtl);
		}
		if min_ttl >= ttl {
			return Err(ConfigError::MinTtlTooLong { ttl, min_ttl });
		}
		if sweep_interval.is_zero() {
			return Err(ConfigError::ZeroSweepInterval);
		}
		Ok(Self {
			ttl,
			min_ttl,
			sweep_interval,
		})
	}

	/// Lifetime of a freshly written lease.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Leases with less remaining lifetime than this are rotated on request.
	pub fn min_ttl(&self) -> Duration {
		self.min_ttl
	}

	pub fn sweep_interval(&self) -> Duration {
		self.sweep_interval
	}
}

#[derive(Debug, Clone, Default)]
pub struct WgTunnelConfig {
	pub lease: LeaseConfig,
	/// Identity-provider groups served by each gateway.
	pub groups: BTreeMap<GatewayId, Vec<String>>,
}

impl WgTunnelConfig {
	/// The first gateway, in interface name order, that serves `group`.
	pub fn gateway_for_group(&self, group: &str) -> Option<&GatewayId> {
		self.groups
			.iter()
			.find(|(_, groups)| groups.iter().any(|g| g == group))
			.map(|(gateway, _)| gateway)
	}

	pub fn groups_for(&self, gateway: &GatewayId) -> Vec<String> {
		self.groups.get(gateway).cloned().unwrap_or_default()
	}

	pub fn configured_gateways(&self) -> impl Iterator<Item = &GatewayId> {
		self.groups.keys()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_lifecycle_timing() {
		let config = LeaseConfig::default();
		assert_eq!(config.ttl(), Duration::from_secs(60));
		assert_eq!(config.min_ttl(), Duration::from_secs(10));
		assert_eq!(config.sweep_interval(), Duration::from_secs(10));
	}

	#[test]
	fn min_ttl_must_be_shorter_than_ttl() {
		let err = LeaseConfig::new(Duration::from_secs(10), Duration::from_secs(10), Duration::from_secs(1)).unwrap_err();
		assert!(matches!(err, ConfigError::MinTtlTooLong { .. }));
	}

	#[test]
	fn zero_durations_rejected() {
		assert_eq!(
			LeaseConfig::new(Duration::ZERO, Duration::ZERO, Duration::from_secs(1)),
			Err(ConfigError::ZeroTtl)
		);
		assert_eq!(
			LeaseConfig::new(Duration::from_secs(5), Duration::from_secs(1), Duration::ZERO),
			Err(ConfigError::ZeroSweepInterval)
		);
	}

	#[test]
	fn group_lookup_is_ordered_by_interface() {
		let mut config = WgTunnelConfig::default();
		config.groups.insert(GatewayId::new("wg1").unwrap(), vec!["eng".to_string()]);
		config
			.groups
			.insert(GatewayId::new("wg0").unwrap(), vec!["ops".to_string(), "eng".to_string()]);

		assert_eq!(config.gateway_for_group("eng").unwrap().as_str(), "wg0");
		assert_eq!(config.gateway_for_group("ops").unwrap().as_str(), "wg0");
		assert!(config.gateway_for_group("sales").is_none());
		assert_eq!(config.groups_for(&GatewayId::new("wg1").unwrap()), vec!["eng"]);
	}
}
