// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reaches a control plane in another process: registration is a JSON
//! POST and propagation messages arrive as server-sent events.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;
use wired_wgtunnel_common::api::{events_path, ErrorResponse, PEER_EVENT, REGISTER_PATH};
use wired_wgtunnel_common::{GatewayId, GatewayRegistrar, GatewayRegistration, RegistrationError};

use crate::error::{AgentError, Result};
use crate::transport::{EventSource, EventStream};

#[derive(Clone)]
pub struct HttpControlPlane {
	server_url: Url,
	http_client: Client,
}

impl HttpControlPlane {
	pub fn new(server_url: Url) -> Result<Self> {
		let http_client = Client::builder()
			.user_agent(concat!("wired-gateway/", env!("CARGO_PKG_VERSION")))
			.build()
			.map_err(|e| AgentError::Transport(e.to_string()))?;

		Ok(Self {
			server_url,
			http_client,
		})
	}

	pub fn server_url(&self) -> &Url {
		&self.server_url
	}
}

/// A client error means the request itself is wrong and retrying the same
/// registration cannot help.
fn registration_error(status: StatusCode, message: String) -> RegistrationError {
	if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::REQUEST_TIMEOUT {
		RegistrationError::Rejected(message)
	} else {
		RegistrationError::Unavailable(message)
	}
}

#[async_trait]
impl GatewayRegistrar for HttpControlPlane {
	#[instrument(skip(self, registration), fields(gateway = %registration.interface))]
	async fn register(&self, registration: GatewayRegistration) -> std::result::Result<(), RegistrationError> {
		let url = self
			.server_url
			.join(REGISTER_PATH)
			.map_err(|e| RegistrationError::Rejected(e.to_string()))?;

		debug!(%url, "registering gateway with control plane");

		let response = self
			.http_client
			.post(url)
			.json(&registration)
			.send()
			.await
			.map_err(|e| RegistrationError::Unavailable(e.to_string()))?;

		let status = response.status();
		if status.is_success() {
			return Ok(());
		}

		let message = match response.json::<ErrorResponse>().await {
			Ok(body) => body.message,
			Err(_) => format!("server returned status {status}"),
		};
		Err(registration_error(status, message))
	}
}

#[async_trait]
impl EventSource for HttpControlPlane {
	#[instrument(skip(self), fields(%gateway))]
	async fn open(&self, gateway: &GatewayId) -> Result<Box<dyn EventStream>> {
		let url = self
			.server_url
			.join(&events_path(gateway))
			.map_err(|e| AgentError::Transport(e.to_string()))?;

		debug!(%url, "connecting to event stream");

		let response = self
			.http_client
			.get(url)
			.header(header::ACCEPT, "text/event-stream")
			.send()
			.await
			.map_err(|e| AgentError::Transport(e.to_string()))?;

		if !response.status().is_success() {
			return Err(AgentError::Transport(format!(
				"server returned status {}",
				response.status()
			)));
		}

		let lines = response
			.bytes_stream()
			.eventsource()
			.filter_map(|result| async move {
				match result {
					Ok(event) if event.event == PEER_EVENT => Some(Ok(event.data)),
					Ok(_) => None,
					Err(e) => {
						warn!(error = %e, "event stream error");
						Some(Err(AgentError::Transport(e.to_string())))
					}
				}
			})
			.boxed();

		debug!("connected to event stream");
		Ok(Box::new(SseStream { lines: Some(lines) }))
	}
}

impl std::fmt::Debug for HttpControlPlane {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HttpControlPlane")
			.field("server_url", &self.server_url)
			.finish()
	}
}

struct SseStream {
	lines: Option<BoxStream<'static, Result<String>>>,
}

#[async_trait]
impl EventStream for SseStream {
	async fn next_line(&mut self) -> Result<Option<String>> {
		match self.lines.as_mut() {
			Some(lines) => lines.next().await.transpose(),
			None => Ok(None),
		}
	}

	/// Dropping the response closes the connection, which ends the
	/// server's subscription.
	async fn close(&mut self, _grace: Duration) -> bool {
		self.lines = None;
		true
	}
}
