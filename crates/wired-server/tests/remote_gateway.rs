// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wired_gateway_wgtunnel::{AgentConfig, AgentError, GatewayAgent, HttpControlPlane, MemoryDevice};
use wired_server::Server;
use wired_server_config::{GroupsConfig, HttpConfig, ServerConfig};
use wired_wgtunnel_common::{GatewayId, RegistrationError, WgKeyPair};

fn wg0() -> GatewayId {
	GatewayId::new("wg0").unwrap()
}

fn config() -> ServerConfig {
	let mut groups = GroupsConfig::default();
	groups.by_gateway.insert(wg0(), vec!["eng".to_string()]);
	ServerConfig {
		groups,
		http: HttpConfig {
			listen_addr: Some("127.0.0.1:0".parse().unwrap()),
		},
		..Default::default()
	}
}

fn remote_control(server: &Server) -> Arc<HttpControlPlane> {
	let addr = server.http_addr().unwrap();
	let url = Url::parse(&format!("http://{addr}")).unwrap();
	Arc::new(HttpControlPlane::new(url).unwrap())
}

fn agent_config(network: &str) -> AgentConfig {
	let mut config = AgentConfig::new(wg0(), "vpn.example.com", network.parse().unwrap());
	config.close_grace = Duration::from_millis(200);
	config
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

#[tokio::test]
async fn gateway_over_http_serves_resolved_leases() {
	let server = Server::start(&config()).await.unwrap();
	let control = remote_control(&server);
	let device = Arc::new(MemoryDevice::new());
	let agent = GatewayAgent::new(agent_config("10.100.0.1/24"), control.clone(), control, device.clone())
		.unwrap()
		.spawn();

	let mut registered = false;
	for _ in 0..500 {
		if server.services.control.engine().registry().get(&wg0()).await.unwrap().is_some() {
			registered = true;
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	assert!(registered);

	let client = *WgKeyPair::generate().unwrap().public_key();
	let tunnel = server
		.services
		.control
		.resolve("eng", "alice", Some(&client.to_base64()))
		.await
		.unwrap();
	assert_eq!(tunnel.address.to_string(), "10.100.0.2/24");
	assert_eq!(tunnel.gateway_public_key, *agent.public_key());

	eventually(|| device.peer(&wg0(), &client).is_some()).await;
	let peer = device.peer(&wg0(), &client).unwrap();
	assert_eq!(peer.preshared_key, tunnel.preshared_key);

	agent.shutdown().await.unwrap();
	server.shutdown().await;
}

#[tokio::test]
async fn gateway_replays_leases_issued_before_it_connected() {
	let server = Server::start(&config()).await.unwrap();
	let control = remote_control(&server);

	// A first agent registers so leases can be issued, then goes away.
	let first = GatewayAgent::new(
		agent_config("10.100.0.1/24"),
		control.clone(),
		control.clone(),
		Arc::new(MemoryDevice::new()),
	)
	.unwrap()
	.spawn();
	for _ in 0..500 {
		if server.services.control.engine().registry().get(&wg0()).await.unwrap().is_some() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	let client = *WgKeyPair::generate().unwrap().public_key();
	server
		.services
		.control
		.resolve("eng", "alice", Some(&client.to_base64()))
		.await
		.unwrap();
	first.shutdown().await.unwrap();

	let device = Arc::new(MemoryDevice::new());
	let second = GatewayAgent::new(agent_config("10.100.0.1/24"), control.clone(), control, device.clone())
		.unwrap()
		.spawn();
	eventually(|| device.peer(&wg0(), &client).is_some()).await;

	second.shutdown().await.unwrap();
	server.shutdown().await;
}

#[tokio::test]
async fn unusable_network_is_rejected_over_http() {
	let server = Server::start(&config()).await.unwrap();
	let control = remote_control(&server);

	let agent = GatewayAgent::new(
		agent_config("10.100.0.1/31"),
		control.clone(),
		control,
		Arc::new(MemoryDevice::new()),
	)
	.unwrap();

	let err = agent.spawn().join().await.unwrap_err();
	assert!(matches!(err, AgentError::Registration(RegistrationError::Rejected(_))));

	server.shutdown().await;
}
