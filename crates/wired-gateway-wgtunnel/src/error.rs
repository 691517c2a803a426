// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use wired_server_store::StoreError;
use wired_wgtunnel_common::{EventError, KeyError, RegistrationError};

use crate::device::ApplyError;

#[derive(Debug, Error)]
pub enum AgentError {
	#[error("malformed propagation message: {0}")]
	MalformedMessage(#[source] EventError),

	#[error("protocol violation: {0}")]
	ProtocolViolation(#[source] EventError),

	#[error("subscription error: {0}")]
	Subscription(#[from] StoreError),

	#[error("subscription ended unexpectedly")]
	StreamEnded,

	#[error("control plane transport failed: {0}")]
	Transport(String),

	#[error("interface apply failed: {0}")]
	Apply(#[from] ApplyError),

	#[error("registration failed: {0}")]
	Registration(#[from] RegistrationError),

	#[error("key generation failed: {0}")]
	Key(#[from] KeyError),

	#[error("agent task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}

impl From<EventError> for AgentError {
	fn from(e: EventError) -> Self {
		if e.is_protocol_violation() {
			AgentError::ProtocolViolation(e)
		} else {
			AgentError::MalformedMessage(e)
		}
	}
}

impl AgentError {
	/// Errors that reconnecting cannot fix.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			AgentError::ProtocolViolation(_)
				| AgentError::Registration(RegistrationError::Rejected(_))
				| AgentError::Key(_)
				| AgentError::Join(_)
		)
	}
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_action_is_fatal() {
		let err: AgentError = "MOD 10.0.0.2 k p u"
			.parse::<wired_wgtunnel_common::PropagationEvent>()
			.unwrap_err()
			.into();
		assert!(matches!(err, AgentError::ProtocolViolation(_)));
		assert!(err.is_fatal());
	}

	#[test]
	fn malformed_line_is_recoverable() {
		let err: AgentError = "ADD 10.0.0.2"
			.parse::<wired_wgtunnel_common::PropagationEvent>()
			.unwrap_err()
			.into();
		assert!(matches!(err, AgentError::MalformedMessage(_)));
		assert!(!err.is_fatal());
	}

	#[test]
	fn registration_outage_is_recoverable() {
		let err = AgentError::Registration(RegistrationError::Unavailable("store down".to_string()));
		assert!(!err.is_fatal());
		let err = AgentError::Registration(RegistrationError::Rejected("/31".to_string()));
		assert!(err.is_fatal());
	}

	#[test]
	fn transport_failure_is_recoverable() {
		assert!(!AgentError::Transport("connection refused".to_string()).is_fatal());
	}
}
