// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP contract between the control plane and gateway agents in other
//! processes.
//!
//! - `POST /internal/gateways` takes a JSON [`GatewayRegistration`]:
//!   `204` on success, `422` when the registration can never succeed, `503`
//!   when the control plane cannot take it right now.
//! - `GET /internal/gateways/{interface}/events` is a server-sent event
//!   stream. Each `peer` event carries one propagation message in its wire
//!   form. The subscription is live once the response headers arrive.
//!
//! [`GatewayRegistration`]: crate::gateway::GatewayRegistration

use serde::{Deserialize, Serialize};

use crate::gateway::GatewayId;

pub const REGISTER_PATH: &str = "/internal/gateways";

pub const EVENTS_ROUTE: &str = "/internal/gateways/{interface}/events";

/// SSE event name of a propagation message.
pub const PEER_EVENT: &str = "peer";

pub fn events_path(gateway: &GatewayId) -> String {
	EVENTS_ROUTE.replace("{interface}", gateway.as_str())
}

/// Body of every non-success response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn events_path_names_the_interface() {
		let gateway = GatewayId::new("wg-corp").unwrap();
		assert_eq!(events_path(&gateway), "/internal/gateways/wg-corp/events");
	}
}
