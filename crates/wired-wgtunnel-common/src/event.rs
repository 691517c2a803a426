// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Propagation events and their single-line wire form.
//!
//! A message is `ACTION IP PUBLICKEY PSK UID`, space separated. The uid is
//! the last field and may itself contain spaces.

use crate::keys::{KeyError, WgPresharedKey, WgPublicKey};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
	#[error("unknown action: {0}")]
	UnknownAction(String),

	#[error("expected 5 fields, got {0}")]
	FieldCount(usize),

	#[error("invalid address: {0}")]
	InvalidAddress(String),

	#[error("invalid {field}: {source}")]
	InvalidKey {
		field: &'static str,
		#[source]
		source: KeyError,
	},
}

impl EventError {
	/// An action outside ADD/DEL means the sender is broken, not the line.
	pub fn is_protocol_violation(&self) -> bool {
		matches!(self, EventError::UnknownAction(_))
	}
}

pub type Result<T> = std::result::Result<T, EventError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerAction {
	Add,
	Del,
}

impl PeerAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			PeerAction::Add => "ADD",
			PeerAction::Del => "DEL",
		}
	}
}

impl fmt::Display for PeerAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PeerAction {
	type Err = EventError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"ADD" => Ok(PeerAction::Add),
			"DEL" => Ok(PeerAction::Del),
			other => Err(EventError::UnknownAction(other.to_string())),
		}
	}
}

/// Whether `uid` survives the wire form unchanged: it must be non-empty and
/// free of control characters, since the decoder trims line endings.
pub fn is_valid_uid(uid: &str) -> bool {
	!uid.is_empty() && !uid.chars().any(char::is_control)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationEvent {
	pub action: PeerAction,
	pub ip: IpAddr,
	pub public_key: WgPublicKey,
	pub preshared_key: WgPresharedKey,
	pub uid: String,
}

impl PropagationEvent {
	/// The wire line, preshared key included. Never log this.
	pub fn encode(&self) -> String {
		format!(
			"{} {} {} {} {}",
			self.action,
			self.ip,
			self.public_key,
			self.preshared_key.to_base64().expose(),
			self.uid
		)
	}
}

/// Log form: same layout as the wire line with the preshared key redacted.
impl fmt::Display for PropagationEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} {} {} {} {}",
			self.action,
			self.ip,
			self.public_key,
			crate::secret::REDACTED,
			self.uid
		)
	}
}

impl FromStr for PropagationEvent {
	type Err = EventError;

	fn from_str(line: &str) -> Result<Self> {
		let line = line.trim_end_matches(['\r', '\n']);
		let fields: Vec<&str> = line.splitn(5, ' ').collect();

		// The action is checked first so a foreign verb is reported as such
		// even when the rest of the line is garbage.
		let action: PeerAction = fields.first().copied().unwrap_or_default().parse()?;

		if fields.len() != 5 || fields.iter().any(|f| f.is_empty()) {
			return Err(EventError::FieldCount(fields.iter().filter(|f| !f.is_empty()).count()));
		}

		let ip = fields[1]
			.parse()
			.map_err(|_| EventError::InvalidAddress(fields[1].to_string()))?;
		let public_key = WgPublicKey::from_base64(fields[2]).map_err(|source| EventError::InvalidKey {
			field: "public key",
			source,
		})?;
		let preshared_key = WgPresharedKey::from_base64(fields[3]).map_err(|source| EventError::InvalidKey {
			field: "preshared key",
			source,
		})?;

		Ok(Self {
			action,
			ip,
			public_key,
			preshared_key,
			uid: fields[4].to_string(),
		})
	}
}
