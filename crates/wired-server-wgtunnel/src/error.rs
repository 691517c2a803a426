// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use wired_server_store::StoreError;
use wired_wgtunnel_common::{GatewayId, KeyError};

#[derive(Error, Debug)]
pub enum WgError {
	#[error("address pool exhausted on gateway {0}")]
	ExhaustedPool(GatewayId),

	#[error("lease store unavailable: {0}")]
	StoreUnavailable(#[from] StoreError),

	#[error("invalid public key: {0}")]
	InvalidPublicKey(String),

	#[error("invalid uid: \"{0}\"")]
	InvalidUid(String),

	#[error("no gateway serves group {0}")]
	UnknownGroup(String),

	#[error("gateway not registered: {0}")]
	GatewayNotRegistered(GatewayId),

	#[error("credential generation failed: {0}")]
	Credentials(String),

	#[error("corrupt record at {key}: {reason}")]
	CorruptRecord { key: String, reason: String },

	#[error("internal error: {0}")]
	Internal(String),
}

impl WgError {
	/// Errors the front door renders as access-denied rather than a server
	/// failure.
	pub fn is_access_denied(&self) -> bool {
		matches!(self, WgError::ExhaustedPool(_) | WgError::UnknownGroup(_))
	}
}

pub type Result<T> = std::result::Result<T, WgError>;

impl From<KeyError> for WgError {
	fn from(e: KeyError) -> Self {
		match e {
			KeyError::Entropy(_) => WgError::Credentials(e.to_string()),
			other => WgError::InvalidPublicKey(other.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn access_denied_classification() {
		let gw = GatewayId::new("wg0").unwrap();
		assert!(WgError::ExhaustedPool(gw.clone()).is_access_denied());
		assert!(WgError::UnknownGroup("eng".to_string()).is_access_denied());
		assert!(!WgError::GatewayNotRegistered(gw).is_access_denied());
		assert!(!WgError::InvalidUid(String::new()).is_access_denied());
		assert!(!WgError::from(StoreError::Internal("down".to_string())).is_access_denied());
	}

	#[test]
	fn store_errors_become_unavailable() {
		let err: WgError = StoreError::Internal("connection reset".to_string()).into();
		assert!(matches!(err, WgError::StoreUnavailable(_)));
	}

	#[test]
	fn key_errors_map_by_kind() {
		let err: WgError = KeyError::InvalidLength(3).into();
		assert!(matches!(err, WgError::InvalidPublicKey(_)));
	}
}
