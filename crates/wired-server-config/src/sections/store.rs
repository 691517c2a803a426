// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lease store backend selection.

use serde::{Deserialize, Serialize};

const DEFAULT_DATABASE_URL: &str = "sqlite:./wired.db";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
	#[default]
	Memory,
	Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
	pub backend: StoreBackend,
	pub database_url: String,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			backend: StoreBackend::Memory,
			database_url: DEFAULT_DATABASE_URL.to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfigLayer {
	#[serde(default)]
	pub backend: Option<StoreBackend>,
	#[serde(default)]
	pub database_url: Option<String>,
}

impl StoreConfigLayer {
	pub fn merge(&mut self, other: StoreConfigLayer) {
		if other.backend.is_some() {
			self.backend = other.backend;
		}
		if other.database_url.is_some() {
			self.database_url = other.database_url;
		}
	}

	pub fn finalize(self) -> StoreConfig {
		StoreConfig {
			backend: self.backend.unwrap_or_default(),
			database_url: self
				.database_url
				.unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_is_memory() {
		let config = StoreConfigLayer::default().finalize();
		assert_eq!(config.backend, StoreBackend::Memory);
		assert_eq!(config.database_url, "sqlite:./wired.db");
	}

	#[test]
	fn test_deserialize_sqlite() {
		let layer: StoreConfigLayer = toml::from_str(
			r#"
backend = "sqlite"
database_url = "sqlite:/var/lib/wired/leases.db"
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.backend, StoreBackend::Sqlite);
		assert_eq!(config.database_url, "sqlite:/var/lib/wired/leases.db");
	}
}
