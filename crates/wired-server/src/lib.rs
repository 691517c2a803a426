// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process wiring for the Wired control plane: store selection, lease
//! services, the sweeper, the gateway HTTP endpoint and any gateway agents
//! hosted in-process.

pub mod routes;

use anyhow::Context;
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wired_gateway_wgtunnel::{AgentConfig, AgentHandle, GatewayAgent, MemoryDevice, StoreEventSource};
use wired_server_config::{GatewayAgentConfig, ServerConfig, StoreBackend};
use wired_server_store::{create_pool, ChannelHub, LeaseStore, MemoryLeaseStore, SqliteLeaseStore};
use wired_server_wgtunnel::{LeaseConfig, WgTunnelConfig, WgTunnelServices};

pub async fn build_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn LeaseStore>> {
	match config.store.backend {
		StoreBackend::Memory => Ok(Arc::new(MemoryLeaseStore::new())),
		StoreBackend::Sqlite => {
			let pool = create_pool(&config.store.database_url)
				.await
				.with_context(|| format!("opening {}", config.store.database_url))?;
			let store = SqliteLeaseStore::new(pool, ChannelHub::new()).await?;
			let purged = store.purge_expired().await?;
			if purged > 0 {
				info!(purged, "dropped lease rows that expired while offline");
			}
			Ok(Arc::new(store))
		}
	}
}

pub fn wgtunnel_config(config: &ServerConfig) -> anyhow::Result<WgTunnelConfig> {
	let lease = LeaseConfig::new(
		config.lease.ttl(),
		config.lease.min_ttl(),
		config.lease.sweep_interval(),
	)?;

	Ok(WgTunnelConfig {
		lease,
		groups: config.groups.by_gateway.clone(),
	})
}

pub fn agent_config(gateway: &GatewayAgentConfig) -> AgentConfig {
	let mut config = AgentConfig::new(gateway.interface.clone(), gateway.endpoint.clone(), gateway.network);
	config.port = gateway.port;
	config.allowed_ips = gateway.allowed_ips.clone();
	config.dns = gateway.dns.clone();
	config
}

/// Open event streams never finish on their own, so the HTTP server gets
/// this long to drain before it is aborted.
const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct HttpServer {
	local_addr: SocketAddr,
	shutdown_tx: oneshot::Sender<()>,
	task: JoinHandle<std::io::Result<()>>,
}

impl HttpServer {
	async fn bind(addr: SocketAddr, state: routes::AppState) -> anyhow::Result<Self> {
		let listener = TcpListener::bind(addr)
			.await
			.with_context(|| format!("binding gateway endpoint on {addr}"))?;
		let local_addr = listener.local_addr()?;
		let app = routes::router(state);

		let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
		let task = tokio::spawn(async move {
			axum::serve(listener, app)
				.with_graceful_shutdown(async move {
					let _ = shutdown_rx.await;
				})
				.await
		});

		info!(%local_addr, "gateway endpoint listening");
		Ok(Self {
			local_addr,
			shutdown_tx,
			task,
		})
	}

	async fn shutdown(self) {
		let _ = self.shutdown_tx.send(());
		let mut task = self.task;
		match tokio::time::timeout(HTTP_SHUTDOWN_GRACE, &mut task).await {
			Ok(Ok(Ok(()))) => {}
			Ok(Ok(Err(e))) => warn!(error = %e, "gateway endpoint failed"),
			Ok(Err(e)) => warn!(error = %e, "gateway endpoint task failed"),
			Err(_) => {
				warn!("gateway event streams still open, aborting endpoint");
				task.abort();
			}
		}
	}
}

/// A running control plane.
pub struct Server {
	pub services: WgTunnelServices,
	pub store: Arc<dyn LeaseStore>,
	pub device: Arc<MemoryDevice>,
	agents: Vec<AgentHandle>,
	http: Option<HttpServer>,
}

impl Server {
	pub async fn start(config: &ServerConfig) -> anyhow::Result<Self> {
		let store = build_store(config).await?;
		let services = WgTunnelServices::new(store.clone(), wgtunnel_config(config)?);
		services.sweeper.start().await;

		let http = match config.http.listen_addr {
			Some(addr) => Some(
				HttpServer::bind(
					addr,
					routes::AppState {
						control: services.control.clone(),
					},
				)
				.await?,
			),
			None => None,
		};

		let device = Arc::new(MemoryDevice::new());
		let mut agents = Vec::with_capacity(config.gateways.len());
		for gateway in &config.gateways {
			let agent = GatewayAgent::new(
				agent_config(gateway),
				Arc::new(services.control.clone()),
				Arc::new(StoreEventSource::new(store.clone())),
				device.clone(),
			)?;
			info!(gateway = %gateway.interface, network = %gateway.network, "starting in-process gateway agent");
			agents.push(agent.spawn());
		}

		Ok(Self {
			services,
			store,
			device,
			agents,
			http,
		})
	}

	pub fn agents(&self) -> &[AgentHandle] {
		&self.agents
	}

	/// Where remote gateways reach this control plane, when enabled.
	pub fn http_addr(&self) -> Option<SocketAddr> {
		self.http.as_ref().map(|http| http.local_addr)
	}

	/// Stops the agents (closing their subscriptions), then the gateway
	/// endpoint, then the sweeper.
	pub async fn shutdown(self) {
		let results = join_all(self.agents.into_iter().map(|agent| agent.shutdown())).await;
		for result in results {
			if let Err(e) = result {
				warn!(error = %e, "gateway agent ended with an error");
			}
		}

		if let Some(http) = self.http {
			http.shutdown().await;
		}

		self.services.sweeper.shutdown().await;
		info!("control plane stopped");
	}

	/// Resolves when any agent stops on its own, which only happens on a
	/// fatal error. Pending forever when no agents are hosted.
	pub async fn wait_for_agent_exit(&self) {
		loop {
			if self.agents.iter().any(AgentHandle::is_finished) {
				error!("a gateway agent exited");
				return;
			}
			tokio::time::sleep(std::time::Duration::from_secs(1)).await;
		}
	}
}
