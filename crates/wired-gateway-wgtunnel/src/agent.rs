// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use wired_wgtunnel_common::{GatewayRegistrar, PropagationEvent, WgKeyPair, WgPublicKey};

use crate::config::AgentConfig;
use crate::device::InterfaceApply;
use crate::error::{AgentError, Result};
use crate::peers::PeerTable;
use crate::transport::{EventSource, EventStream};

/// Keeps one gateway's interface in step with the control plane.
///
/// A session subscribes to the gateway's channel, registers (which makes
/// the control plane replay every valid lease), then applies events until
/// shutdown or until the session breaks. A broken session is retried with
/// backoff; a protocol violation or a rejected registration ends the agent.
pub struct GatewayAgent {
	config: AgentConfig,
	keypair: WgKeyPair,
	registrar: Arc<dyn GatewayRegistrar>,
	events: Arc<dyn EventSource>,
	device: Arc<dyn InterfaceApply>,
	peers: PeerTable,
	shutdown_tx: Arc<watch::Sender<bool>>,
	shutdown_rx: watch::Receiver<bool>,
}

impl GatewayAgent {
	/// Generates the interface keypair. The private half lives only in this
	/// agent's memory.
	#[instrument(skip_all, fields(gateway = %config.interface))]
	pub fn new(
		config: AgentConfig,
		registrar: Arc<dyn GatewayRegistrar>,
		events: Arc<dyn EventSource>,
		device: Arc<dyn InterfaceApply>,
	) -> Result<Self> {
		let keypair = WgKeyPair::generate()?;
		info!(public_key = %keypair.public_key(), "generated ephemeral WireGuard keypair");

		let (shutdown_tx, shutdown_rx) = watch::channel(false);

		Ok(Self {
			config,
			keypair,
			registrar,
			events,
			device,
			peers: PeerTable::new(),
			shutdown_tx: Arc::new(shutdown_tx),
			shutdown_rx,
		})
	}

	pub fn public_key(&self) -> &WgPublicKey {
		self.keypair.public_key()
	}

	pub fn config(&self) -> &AgentConfig {
		&self.config
	}

	pub fn shutdown(&self) {
		let _ = self.shutdown_tx.send(true);
	}

	/// Runs the agent on its own task.
	pub fn spawn(mut self) -> AgentHandle {
		let shutdown_tx = self.shutdown_tx.clone();
		let public_key = *self.public_key();
		let task = tokio::spawn(async move { self.run().await });
		AgentHandle {
			shutdown_tx,
			public_key,
			task,
		}
	}

	#[instrument(skip(self), fields(gateway = %self.config.interface))]
	pub async fn run(&mut self) -> Result<()> {
		let mut failures: u32 = 0;
		let mut shutdown_rx = self.shutdown_rx.clone();

		loop {
			if *shutdown_rx.borrow() {
				break;
			}

			match self.session(&mut failures).await {
				Ok(()) => break,
				Err(e) if e.is_fatal() => {
					error!(error = %e, "gateway agent stopping");
					return Err(e);
				}
				Err(e) => {
					failures += 1;
					warn!(error = %e, failures, "session lost");
				}
			}

			let delay = self.config.backoff(failures);
			debug!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				_ = shutdown_rx.changed() => {}
			}
		}

		info!("gateway agent stopped");
		Ok(())
	}

	/// Returns `Ok` only when shutdown was requested.
	async fn session(&mut self, failures: &mut u32) -> Result<()> {
		// Subscribe first so the replay triggered by registration is heard.
		let mut stream = self.events.open(&self.config.interface).await?;

		let registration = self.config.registration(*self.keypair.public_key());
		if let Err(e) = self.registrar.register(registration).await {
			stream.close(self.config.close_grace).await;
			return Err(e.into());
		}
		*failures = 0;
		info!(network = %self.config.network, "registered with control plane");

		let outcome = self.pump(stream.as_mut()).await;

		let acked = stream.close(self.config.close_grace).await;
		debug!(acked, "subscription closed");
		outcome
	}

	async fn pump(&mut self, stream: &mut dyn EventStream) -> Result<()> {
		let mut shutdown_rx = self.shutdown_rx.clone();

		loop {
			tokio::select! {
				biased;

				changed = shutdown_rx.changed() => {
					if changed.is_err() || *shutdown_rx.borrow() {
						info!("shutdown signal received");
						return Ok(());
					}
				}

				message = stream.next_line() => match message? {
					Some(line) => self.handle_message(&line).await?,
					None => return Err(AgentError::StreamEnded),
				}
			}
		}
	}

	/// Errors only for messages that end the session. A failed apply is
	/// logged and left for the next replay to repair.
	async fn handle_message(&mut self, line: &str) -> Result<()> {
		let event: PropagationEvent = line.parse()?;

		let Some(change) = self.peers.change_for(&event) else {
			return Ok(());
		};

		match self
			.device
			.apply(
				&self.config.interface,
				self.keypair.private_key(),
				self.config.port,
				std::slice::from_ref(&change),
			)
			.await
		{
			Ok(()) => debug!(%event, "applied"),
			Err(e) => error!(error = %e, %event, "failed to apply peer change"),
		}
		Ok(())
	}
}

impl std::fmt::Debug for GatewayAgent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GatewayAgent")
			.field("interface", &self.config.interface)
			.field("public_key", self.keypair.public_key())
			.field("peers", &self.peers.len())
			.finish()
	}
}

/// A spawned agent.
pub struct AgentHandle {
	shutdown_tx: Arc<watch::Sender<bool>>,
	public_key: WgPublicKey,
	task: JoinHandle<Result<()>>,
}

impl AgentHandle {
	pub fn public_key(&self) -> &WgPublicKey {
		&self.public_key
	}

	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}

	/// Asks the agent to stop and waits for it to close its subscription.
	pub async fn shutdown(self) -> Result<()> {
		let _ = self.shutdown_tx.send(true);
		self.task.await?
	}

	/// Waits for the agent to stop on its own.
	pub async fn join(self) -> Result<()> {
		self.task.await?
	}
}
