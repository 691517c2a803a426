// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod bus;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod leases;
pub mod registry;
pub mod sweep;

pub use bus::PropagationBus;
pub use config::{ConfigError, LeaseConfig, WgTunnelConfig};
pub use control::{ControlPlane, ResolvedTunnel};
pub use engine::{IssuedLease, LeaseEngine, LeaseOutcome, SweepReport};
pub use error::{Result, WgError};
pub use leases::{IndexEntry, Lease, LeaseRepository};
pub use registry::{GatewayDescriptor, GatewayRegistry};
pub use sweep::Sweeper;

use std::sync::Arc;
use wired_server_store::LeaseStore;

#[derive(Clone)]
pub struct WgTunnelServices {
	pub control: ControlPlane,
	pub sweeper: Arc<Sweeper>,
	pub config: Arc<WgTunnelConfig>,
}

impl WgTunnelServices {
	pub fn new(store: Arc<dyn LeaseStore>, config: WgTunnelConfig) -> Self {
		let config = Arc::new(config);
		let engine = Arc::new(LeaseEngine::new(store, config.lease));
		let control = ControlPlane::new(engine, config.clone());
		let sweeper = Arc::new(Sweeper::new(control.clone()));

		Self {
			control,
			sweeper,
			config,
		}
	}
}
