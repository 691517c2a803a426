// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wired_gateway_wgtunnel::{
	AgentConfig, AgentError, ApplyError, GatewayAgent, InterfaceApply, MemoryDevice, PeerChange, StoreEventSource,
};
use wired_server_store::{LeaseStore, MemoryLeaseStore};
use wired_server_wgtunnel::{ControlPlane, LeaseOutcome, WgTunnelConfig, WgTunnelServices};
use wired_wgtunnel_common::{
	GatewayId, GatewayRegistrar, GatewayRegistration, RegistrationError, WgKeyPair, WgPrivateKey, WgPublicKey,
};

fn wg0() -> GatewayId {
	GatewayId::new("wg0").unwrap()
}

fn new_key() -> WgPublicKey {
	*WgKeyPair::generate().unwrap().public_key()
}

struct Harness {
	store: Arc<MemoryLeaseStore>,
	control: ControlPlane,
}

impl Harness {
	fn events(&self) -> Arc<StoreEventSource> {
		Arc::new(StoreEventSource::new(self.store.clone()))
	}
}

fn harness() -> Harness {
	let store = Arc::new(MemoryLeaseStore::new());
	let mut config = WgTunnelConfig::default();
	config.groups.insert(wg0(), vec!["eng".to_string()]);
	let services = WgTunnelServices::new(store.clone(), config);
	Harness {
		store,
		control: services.control,
	}
}

fn agent_config(network: &str) -> AgentConfig {
	let mut config = AgentConfig::new(wg0(), "vpn.example.com", network.parse().unwrap());
	config.close_grace = Duration::from_millis(200);
	config
}

fn agent(h: &Harness, registrar: Arc<dyn GatewayRegistrar>, device: Arc<dyn InterfaceApply>) -> GatewayAgent {
	GatewayAgent::new(agent_config("10.100.0.1/24"), registrar, h.events(), device).unwrap()
}

async fn registered(h: &Harness) {
	for _ in 0..500 {
		if h.control.engine().registry().get(&wg0()).await.unwrap().is_some() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("gateway never registered");
}

async fn eventually(mut check: impl FnMut() -> bool) {
	for _ in 0..500 {
		if check() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn issued_lease_reaches_the_device() {
	let h = harness();
	let device = Arc::new(MemoryDevice::new());
	let handle = agent(&h, Arc::new(h.control.clone()), device.clone()).spawn();
	registered(&h).await;

	let client = new_key();
	let tunnel = h
		.control
		.resolve("eng", "alice@example.com", Some(&client.to_base64()))
		.await
		.unwrap();
	assert_eq!(tunnel.gateway_public_key, *handle.public_key());

	eventually(|| device.peer(&wg0(), &client).is_some()).await;
	let peer = device.peer(&wg0(), &client).unwrap();
	assert_eq!(peer.preshared_key, tunnel.preshared_key);
	assert_eq!(peer.allowed_ips, vec![wired_wgtunnel_common::host_route(tunnel.address.addr())]);
	assert_eq!(device.interface_key(&wg0()), Some(*handle.public_key()));
	assert_eq!(device.listen_port(&wg0()), Some(51820));

	handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rotation_replaces_the_peer() {
	let h = harness();
	let device = Arc::new(MemoryDevice::new());
	let handle = agent(&h, Arc::new(h.control.clone()), device.clone()).spawn();
	registered(&h).await;

	let old = new_key();
	h.control.resolve("eng", "alice", Some(&old.to_base64())).await.unwrap();
	eventually(|| device.peer(&wg0(), &old).is_some()).await;

	let new = new_key();
	h.control.resolve("eng", "alice", Some(&new.to_base64())).await.unwrap();
	eventually(|| device.peer(&wg0(), &new).is_some()).await;

	assert!(device.peer(&wg0(), &old).is_none());
	assert_eq!(device.peer_count(&wg0()), 1);

	handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn sweep_removes_expired_peer() {
	let h = harness();
	let device = Arc::new(MemoryDevice::new());
	let handle = agent(&h, Arc::new(h.control.clone()), device.clone()).spawn();
	registered(&h).await;

	h.control.resolve("eng", "alice", Some(&new_key().to_base64())).await.unwrap();
	eventually(|| device.peer_count(&wg0()) == 1).await;

	tokio::time::advance(Duration::from_secs(61)).await;
	let report = h.control.engine().sweep(&wg0()).await.unwrap();
	assert_eq!(report.reclaimed, 1);
	eventually(|| device.peer_count(&wg0()) == 0).await;

	handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn restarted_gateway_rebuilds_from_replay() {
	let h = harness();
	let first_device = Arc::new(MemoryDevice::new());
	let first = agent(&h, Arc::new(h.control.clone()), first_device.clone()).spawn();
	registered(&h).await;

	let alice = new_key();
	let bob = new_key();
	h.control.resolve("eng", "alice", Some(&alice.to_base64())).await.unwrap();
	h.control.resolve("eng", "bob", Some(&bob.to_base64())).await.unwrap();
	eventually(|| first_device.peer_count(&wg0()) == 2).await;
	first.shutdown().await.unwrap();

	let device = Arc::new(MemoryDevice::new());
	let second = agent(&h, Arc::new(h.control.clone()), device.clone()).spawn();
	eventually(|| device.peer_count(&wg0()) == 2).await;
	assert!(device.peer(&wg0(), &alice).is_some());
	assert!(device.peer(&wg0(), &bob).is_some());

	// Clients keep their leases and learn the new gateway key on refresh.
	let tunnel = h.control.resolve("eng", "alice", Some(&alice.to_base64())).await.unwrap();
	assert_eq!(tunnel.outcome, LeaseOutcome::Reused);
	assert_eq!(tunnel.gateway_public_key, *second.public_key());

	second.shutdown().await.unwrap();
}

struct CountingRegistrar {
	inner: ControlPlane,
	calls: AtomicUsize,
}

#[async_trait]
impl GatewayRegistrar for CountingRegistrar {
	async fn register(&self, registration: GatewayRegistration) -> Result<(), RegistrationError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		self.inner.register(registration).await
	}
}

#[tokio::test(start_paused = true)]
async fn malformed_message_reconnects_and_reregisters() {
	let h = harness();
	let registrar = Arc::new(CountingRegistrar {
		inner: h.control.clone(),
		calls: AtomicUsize::new(0),
	});
	let device = Arc::new(MemoryDevice::new());
	let handle = agent(&h, registrar.clone(), device.clone()).spawn();
	eventually(|| registrar.calls.load(Ordering::SeqCst) == 1).await;
	registered(&h).await;

	let alice = new_key();
	h.control.resolve("eng", "alice", Some(&alice.to_base64())).await.unwrap();
	eventually(|| device.peer_count(&wg0()) == 1).await;

	h.store.publish("wg0", "ADD garbage".to_string()).await.unwrap();
	eventually(|| registrar.calls.load(Ordering::SeqCst) == 2).await;
	assert!(!handle.is_finished());

	// The new session still applies events.
	let bob = new_key();
	h.control.resolve("eng", "bob", Some(&bob.to_base64())).await.unwrap();
	eventually(|| device.peer(&wg0(), &bob).is_some()).await;
	assert!(device.peer(&wg0(), &alice).is_some());

	handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_action_stops_the_agent() {
	let h = harness();
	let handle = agent(&h, Arc::new(h.control.clone()), Arc::new(MemoryDevice::new())).spawn();
	registered(&h).await;

	h.store.publish("wg0", "MOD 10.100.0.2 k p alice".to_string()).await.unwrap();

	let err = handle.join().await.unwrap_err();
	assert!(matches!(err, AgentError::ProtocolViolation(_)));
	assert_eq!(h.store.hub().subscriber_count("wg0").await, 0);
}

/// Fails the first apply, then behaves like a memory device.
struct FlakyDevice {
	inner: MemoryDevice,
	failed: AtomicBool,
}

#[async_trait]
impl InterfaceApply for FlakyDevice {
	async fn apply(
		&self,
		interface: &GatewayId,
		private_key: &WgPrivateKey,
		listen_port: u16,
		changes: &[PeerChange],
	) -> Result<(), ApplyError> {
		if !self.failed.swap(true, Ordering::SeqCst) {
			return Err(ApplyError::Rejected("netlink busy".to_string()));
		}
		self.inner.apply(interface, private_key, listen_port, changes).await
	}
}

#[tokio::test(start_paused = true)]
async fn apply_failure_is_repaired_by_the_next_replay() {
	let h = harness();
	let device = Arc::new(FlakyDevice {
		inner: MemoryDevice::new(),
		failed: AtomicBool::new(false),
	});
	let handle = agent(&h, Arc::new(h.control.clone()), device.clone()).spawn();
	registered(&h).await;

	let alice = new_key();
	let bob = new_key();
	h.control.resolve("eng", "alice", Some(&alice.to_base64())).await.unwrap();
	h.control.resolve("eng", "bob", Some(&bob.to_base64())).await.unwrap();

	eventually(|| device.inner.peer(&wg0(), &bob).is_some()).await;
	assert!(device.inner.peer(&wg0(), &alice).is_none());
	assert!(!handle.is_finished());

	h.control
		.register(agent_config("10.100.0.1/24").registration(*handle.public_key()))
		.await
		.unwrap();
	eventually(|| device.inner.peer(&wg0(), &alice).is_some()).await;

	handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_subscription() {
	let h = harness();
	let handle = agent(&h, Arc::new(h.control.clone()), Arc::new(MemoryDevice::new())).spawn();
	registered(&h).await;
	assert_eq!(h.store.hub().subscriber_count("wg0").await, 1);

	handle.shutdown().await.unwrap();
	assert_eq!(h.store.hub().subscriber_count("wg0").await, 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_registration_is_fatal() {
	let h = harness();
	let agent = GatewayAgent::new(
		agent_config("10.100.0.1/31"),
		Arc::new(h.control.clone()),
		h.events(),
		Arc::new(MemoryDevice::new()),
	)
	.unwrap();

	let err = agent.spawn().join().await.unwrap_err();
	assert!(matches!(err, AgentError::Registration(RegistrationError::Rejected(_))));
	assert_eq!(h.store.hub().subscriber_count("wg0").await, 0);
}
