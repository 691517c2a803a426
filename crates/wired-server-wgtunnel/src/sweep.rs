// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::control::ControlPlane;
use crate::engine::SweepReport;

/// Periodically sweeps every known gateway.
pub struct Sweeper {
	control: ControlPlane,
	interval: Duration,
	shutdown_tx: broadcast::Sender<()>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
	pub fn new(control: ControlPlane) -> Self {
		let interval = control.engine().config().sweep_interval();
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			control,
			interval,
			shutdown_tx,
			handle: Mutex::new(None),
		}
	}

	/// Runs one pass over all gateways. Failures on one gateway are logged
	/// and do not stop the others; the next tick retries them.
	#[instrument(skip(self))]
	pub async fn sweep_all(&self) -> SweepReport {
		sweep_all(&self.control).await
	}

	pub async fn start(&self) {
		let mut handle = self.handle.lock().await;
		if handle.is_some() {
			return;
		}

		let control = self.control.clone();
		let interval = self.interval;
		let mut shutdown_rx = self.shutdown_tx.subscribe();

		*handle = Some(tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = tokio::time::sleep(interval) => {
						sweep_all(&control).await;
					}
					_ = shutdown_rx.recv() => {
						info!("Shutting down lease sweeper");
						break;
					}
				}
			}
		}));

		info!(interval_secs = interval.as_secs(), "Lease sweeper started");
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());
		if let Some(handle) = self.handle.lock().await.take() {
			let _ = handle.await;
		}
	}
}

async fn sweep_all(control: &ControlPlane) -> SweepReport {
	let mut total = SweepReport::default();

	let gateways = match control.known_gateways().await {
		Ok(gateways) => gateways,
		Err(e) => {
			warn!(error = %e, "sweep: failed to list gateways");
			return total;
		}
	};

	for gateway in gateways {
		match control.engine().sweep(&gateway).await {
			Ok(report) => {
				total.reclaimed += report.reclaimed;
				total.live += report.live;
				total.skipped += report.skipped;
			}
			Err(e) => warn!(%gateway, error = %e, "sweep failed, retrying next tick"),
		}
	}

	total
}
