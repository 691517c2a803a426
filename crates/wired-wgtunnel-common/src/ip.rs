// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel address allocation.
//!
//! Addresses are handed out by an ascending scan over a gateway subnet. The
//! scan works on the integer form of the address so that it carries across
//! octet boundaries for any prefix length.

use ipnet::IpNet;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpError {
	#[error("IP address pool exhausted")]
	PoolExhausted,

	#[error("invalid IP address: {0}")]
	InvalidAddress(String),

	#[error("IP address not in expected subnet: {0}")]
	NotInSubnet(String),
}

pub type Result<T> = std::result::Result<T, IpError>;

fn to_bits(addr: IpAddr) -> u128 {
	match addr {
		IpAddr::V4(v4) => u128::from(u32::from(v4)),
		IpAddr::V6(v6) => u128::from(v6),
	}
}

/// The pool of client addresses of one gateway subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPool {
	net: IpNet,
}

impl IpPool {
	pub fn new(net: IpNet) -> Self {
		Self { net: net.trunc() }
	}

	pub fn net(&self) -> IpNet {
		self.net
	}

	fn from_bits(&self, bits: u128) -> IpAddr {
		match self.net {
			IpNet::V4(_) => IpAddr::V4(Ipv4Addr::from(bits as u32)),
			IpNet::V6(_) => IpAddr::V6(Ipv6Addr::from(bits)),
		}
	}

	/// Returns the lowest address strictly between the network and broadcast
	/// addresses that is not in `used`.
	pub fn allocate(&self, used: &HashSet<IpAddr>) -> Result<IpAddr> {
		let Some(first) = to_bits(self.net.network()).checked_add(1) else {
			return Err(IpError::PoolExhausted);
		};
		let broadcast = to_bits(self.net.broadcast());

		let mut candidate = first;
		while candidate < broadcast {
			let addr = self.from_bits(candidate);
			if !used.contains(&addr) {
				return Ok(addr);
			}
			candidate += 1;
		}

		Err(IpError::PoolExhausted)
	}

	/// Whether `addr` is a usable host address of this pool.
	pub fn is_host(&self, addr: IpAddr) -> bool {
		if !self.net.contains(&addr) {
			return false;
		}
		let bits = to_bits(addr);
		bits > to_bits(self.net.network()) && bits < to_bits(self.net.broadcast())
	}

	/// `addr` annotated with the pool's prefix length, the form a client puts
	/// on its interface.
	pub fn with_prefix(&self, addr: IpAddr) -> Result<IpNet> {
		if !self.is_host(addr) {
			return Err(IpError::NotInSubnet(addr.to_string()));
		}
		IpNet::new(addr, self.net.prefix_len()).map_err(|_| IpError::InvalidAddress(addr.to_string()))
	}
}

/// One-shot form of [`IpPool::allocate`].
pub fn allocate(cidr: IpNet, used: &HashSet<IpAddr>) -> Result<IpAddr> {
	IpPool::new(cidr).allocate(used)
}

/// The single-host route (`/32` or `/128`) for `addr`.
pub fn host_route(addr: IpAddr) -> IpNet {
	IpNet::from(addr)
}
