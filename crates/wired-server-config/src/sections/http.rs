// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP endpoint for gateway agents running in other processes.

use serde::Deserialize;
use std::net::SocketAddr;

/// `listen_addr: None` leaves the endpoint off; only in-process agents can
/// then reach the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpConfig {
	pub listen_addr: Option<SocketAddr>,
}

impl HttpConfig {
	pub fn enabled(&self) -> bool {
		self.listen_addr.is_some()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfigLayer {
	#[serde(default)]
	pub listen_addr: Option<SocketAddr>,
}

impl HttpConfigLayer {
	pub fn merge(&mut self, other: HttpConfigLayer) {
		if other.listen_addr.is_some() {
			self.listen_addr = other.listen_addr;
		}
	}

	pub fn finalize(self) -> HttpConfig {
		HttpConfig {
			listen_addr: self.listen_addr,
		}
	}
}
