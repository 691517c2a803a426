// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, a TOML file and environment
//! variables.

use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	GatewayAgentConfigLayer, GroupsConfigLayer, HttpConfigLayer, LeaseConfigLayer, LogFormat, LoggingConfigLayer,
	StoreBackend, StoreConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file contributes nothing.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/wired/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: `WIRED_SERVER_<SECTION>_<FIELD>`. Structured values
/// (`WIRED_SERVER_GROUPS`, `WIRED_SERVER_GATEWAYS`) are JSON.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			lease: Some(load_lease_from_env()?),
			store: Some(load_store_from_env()?),
			logging: Some(load_logging_from_env()?),
			http: Some(load_http_from_env()?),
			groups: env_json::<GroupsConfigLayer>("WIRED_SERVER_GROUPS")?,
			gateways: env_json::<Vec<GatewayAgentConfigLayer>>("WIRED_SERVER_GATEWAYS")?,
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_json<T: DeserializeOwned>(name: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => serde_json::from_str(&v).map(Some).map_err(|e| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid JSON: {e}"),
		}),
		None => Ok(None),
	}
}

fn load_lease_from_env() -> Result<LeaseConfigLayer, ConfigError> {
	Ok(LeaseConfigLayer {
		ttl_secs: env_u64("WIRED_SERVER_LEASE_TTL_SECS")?,
		min_ttl_secs: env_u64("WIRED_SERVER_LEASE_MIN_TTL_SECS")?,
		sweep_interval_secs: env_u64("WIRED_SERVER_LEASE_SWEEP_INTERVAL_SECS")?,
	})
}

fn load_store_from_env() -> Result<StoreConfigLayer, ConfigError> {
	let backend = match env_var("WIRED_SERVER_STORE_BACKEND") {
		Some(v) => Some(match v.to_lowercase().as_str() {
			"memory" => StoreBackend::Memory,
			"sqlite" => StoreBackend::Sqlite,
			_ => {
				return Err(ConfigError::InvalidValue {
					key: "WIRED_SERVER_STORE_BACKEND".to_string(),
					message: format!("unknown backend '{v}', expected memory or sqlite"),
				})
			}
		}),
		None => None,
	};

	Ok(StoreConfigLayer {
		backend,
		database_url: env_var("WIRED_SERVER_DATABASE_URL"),
	})
}

fn load_http_from_env() -> Result<HttpConfigLayer, ConfigError> {
	let listen_addr = match env_var("WIRED_SERVER_HTTP_LISTEN_ADDR") {
		Some(v) => Some(v.parse().map_err(|_| ConfigError::InvalidValue {
			key: "WIRED_SERVER_HTTP_LISTEN_ADDR".to_string(),
			message: format!("invalid socket address '{v}'"),
		})?),
		None => None,
	};

	Ok(HttpConfigLayer { listen_addr })
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = env_var("WIRED_SERVER_LOG_FORMAT").map(|v| match v.to_lowercase().as_str() {
		"json" => LogFormat::Json,
		_ => LogFormat::Text,
	});

	Ok(LoggingConfigLayer {
		level: env_var("WIRED_SERVER_LOG_LEVEL"),
		format,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_defaults_source_returns_empty_layer() {
		let layer = DefaultsSource.load().unwrap();
		assert!(layer.lease.is_none());
		assert!(layer.gateways.is_none());
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let layer = TomlSource::new("/nonexistent/server.toml").load().unwrap();
		assert!(layer.store.is_none());
	}

	#[test]
	fn test_toml_source_reads_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[store]
backend = "sqlite"

[groups]
wg0 = ["eng"]
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(layer.store.unwrap().backend, Some(StoreBackend::Sqlite));
		assert_eq!(layer.groups.unwrap().0["wg0"], vec!["eng"]);
	}

	#[test]
	fn test_toml_source_reports_parse_errors() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[lease\nttl_secs = ").unwrap();

		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}
}
