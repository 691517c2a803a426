// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lease timing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_TTL_SECS: u64 = 60;
const DEFAULT_MIN_TTL_SECS: u64 = 10;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
	pub ttl_secs: u64,
	pub min_ttl_secs: u64,
	pub sweep_interval_secs: u64,
}

impl Default for LeaseConfig {
	fn default() -> Self {
		Self {
			ttl_secs: DEFAULT_TTL_SECS,
			min_ttl_secs: DEFAULT_MIN_TTL_SECS,
			sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
		}
	}
}

impl LeaseConfig {
	pub fn ttl(&self) -> Duration {
		Duration::from_secs(self.ttl_secs)
	}

	pub fn min_ttl(&self) -> Duration {
		Duration::from_secs(self.min_ttl_secs)
	}

	pub fn sweep_interval(&self) -> Duration {
		Duration::from_secs(self.sweep_interval_secs)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LeaseConfigLayer {
	pub ttl_secs: Option<u64>,
	pub min_ttl_secs: Option<u64>,
	pub sweep_interval_secs: Option<u64>,
}

impl LeaseConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.ttl_secs.is_some() {
			self.ttl_secs = other.ttl_secs;
		}
		if other.min_ttl_secs.is_some() {
			self.min_ttl_secs = other.min_ttl_secs;
		}
		if other.sweep_interval_secs.is_some() {
			self.sweep_interval_secs = other.sweep_interval_secs;
		}
	}

	pub fn finalize(self) -> Result<LeaseConfig, ConfigError> {
		let config = LeaseConfig {
			ttl_secs: self.ttl_secs.unwrap_or(DEFAULT_TTL_SECS),
			min_ttl_secs: self.min_ttl_secs.unwrap_or(DEFAULT_MIN_TTL_SECS),
			sweep_interval_secs: self.sweep_interval_secs.unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
		};

		if config.ttl_secs == 0 {
			return Err(ConfigError::Validation("lease.ttl_secs must be positive".to_string()));
		}
		if config.min_ttl_secs >= config.ttl_secs {
			return Err(ConfigError::Validation(format!(
				"lease.min_ttl_secs ({}) must be shorter than lease.ttl_secs ({})",
				config.min_ttl_secs, config.ttl_secs
			)));
		}
		if config.sweep_interval_secs == 0 {
			return Err(ConfigError::Validation(
				"lease.sweep_interval_secs must be positive".to_string(),
			));
		}

		Ok(config)
	}
}
