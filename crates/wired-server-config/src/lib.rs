// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the Wired control plane.
//!
//! Layers are read from built-in defaults, a TOML file and the environment
//! (`WIRED_SERVER_*`), merged by precedence and then finalised into
//! validated sections.
//!
//! ```ignore
//! use wired_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("leases live for {:?}", config.lease.ttl());
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub lease: LeaseConfig,
	pub store: StoreConfig,
	pub logging: LoggingConfig,
	pub http: HttpConfig,
	pub groups: GroupsConfig,
	pub gateways: Vec<GatewayAgentConfig>,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`WIRED_SERVER_*`)
/// 2. Config file (`/etc/wired/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<ServerConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only.
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	load_from(vec![Box::new(EnvSource)])
}

fn load_from(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Finalize a merged layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let lease = layer.lease.unwrap_or_default().finalize()?;
	let store = layer.store.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();
	let http = layer.http.unwrap_or_default().finalize();
	let groups = layer.groups.unwrap_or_default().finalize()?;
	let gateways = layer
		.gateways
		.unwrap_or_default()
		.into_iter()
		.enumerate()
		.map(|(i, gateway)| gateway.finalize(i))
		.collect::<Result<Vec<_>, _>>()?;

	validate_gateways(&gateways)?;

	info!(
		ttl_secs = lease.ttl_secs,
		min_ttl_secs = lease.min_ttl_secs,
		sweep_interval_secs = lease.sweep_interval_secs,
		backend = ?store.backend,
		http_listen_addr = ?http.listen_addr,
		gateways = gateways.len(),
		groups = groups.by_gateway.values().map(Vec::len).sum::<usize>(),
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		lease,
		store,
		logging,
		http,
		groups,
		gateways,
	})
}

fn validate_gateways(gateways: &[GatewayAgentConfig]) -> Result<(), ConfigError> {
	let mut seen = HashSet::new();
	for gateway in gateways {
		if !seen.insert(&gateway.interface) {
			return Err(ConfigError::Validation(format!(
				"gateway interface {} is configured more than once",
				gateway.interface
			)));
		}
	}
	Ok(())
}
