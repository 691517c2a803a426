// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Gateway agent for Wired.
//!
//! The agent:
//! 1. Generates an ephemeral WireGuard keypair (in memory only, never persisted)
//! 2. Subscribes to its gateway's propagation channel
//! 3. Registers its descriptor, which makes the control plane replay every valid lease
//! 4. Applies ADD/DEL events to the local interface as they arrive
//! 5. Reconnects with jittered backoff when the session breaks
//!
//! An agent in the control plane's process reads the lease store's channel
//! directly through [`StoreEventSource`]. An agent in its own process uses
//! [`HttpControlPlane`] for both registration and events.
//!
//! # Example
//!
//! ```ignore
//! use wired_gateway_wgtunnel::{AgentConfig, GatewayAgent, HttpControlPlane, MemoryDevice};
//!
//! let control = Arc::new(HttpControlPlane::new("http://127.0.0.1:8750".parse()?)?);
//! let config = AgentConfig::new(interface, "vpn.example.com", "10.100.0.1/24".parse()?);
//! let agent = GatewayAgent::new(config, control.clone(), control, Arc::new(MemoryDevice::new()))?;
//! let handle = agent.spawn();
//! // ...
//! handle.shutdown().await?;
//! ```

pub mod agent;
pub mod config;
pub mod device;
pub mod error;
pub mod http;
pub mod peers;
pub mod transport;

pub use agent::{AgentHandle, GatewayAgent};
pub use config::AgentConfig;
pub use device::{ApplyError, DevicePeer, InterfaceApply, MemoryDevice, PeerChange};
pub use error::{AgentError, Result};
pub use http::HttpControlPlane;
pub use peers::PeerTable;
pub use transport::{EventSource, EventStream, StoreEventSource};
