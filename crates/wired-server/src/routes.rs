// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Gateway HTTP handlers.
//!
//! - `POST /internal/gateways` - Register a gateway
//! - `GET /internal/gateways/{interface}/events` - SSE stream of propagation messages

use std::convert::Infallible;
use std::time::Duration;

use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::{
		sse::{Event, KeepAlive},
		IntoResponse, Response, Sse,
	},
	routing::{get, post},
	Json, Router,
};
use futures::stream::Stream;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use wired_server_store::Subscription;
use wired_server_wgtunnel::ControlPlane;
use wired_wgtunnel_common::api::{ErrorResponse, EVENTS_ROUTE, PEER_EVENT, REGISTER_PATH};
use wired_wgtunnel_common::{GatewayId, GatewayRegistrar, GatewayRegistration, RegistrationError};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
	pub control: ControlPlane,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route(REGISTER_PATH, post(register_gateway))
		.route(EVENTS_ROUTE, get(stream_events))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

fn error_response(status: StatusCode, error: &str, message: String) -> Response {
	(
		status,
		Json(ErrorResponse {
			error: error.to_string(),
			message,
		}),
	)
		.into_response()
}

/// POST /internal/gateways
#[instrument(skip(state, registration), fields(gateway = %registration.interface))]
pub async fn register_gateway(
	State(state): State<AppState>,
	Json(registration): Json<GatewayRegistration>,
) -> impl IntoResponse {
	match state.control.register(registration).await {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(RegistrationError::Rejected(message)) => {
			warn!(%message, "gateway registration rejected");
			error_response(StatusCode::UNPROCESSABLE_ENTITY, "registration_rejected", message)
		}
		Err(RegistrationError::Unavailable(message)) => {
			warn!(%message, "gateway registration failed");
			error_response(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", message)
		}
	}
}

/// GET /internal/gateways/{interface}/events
///
/// The subscription is taken before the response is returned, so a gateway
/// that registers after its headers arrive hears the replay.
#[instrument(skip(state))]
pub async fn stream_events(State(state): State<AppState>, Path(interface): Path<String>) -> impl IntoResponse {
	let gateway = match GatewayId::new(interface) {
		Ok(gateway) => gateway,
		Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_gateway", e.to_string()),
	};

	let subscription = match state.control.engine().bus().subscribe(&gateway).await {
		Ok(subscription) => subscription,
		Err(e) => {
			warn!(%gateway, error = %e, "failed to subscribe gateway event stream");
			return error_response(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", e.to_string());
		}
	};

	info!(%gateway, "starting gateway event stream");

	Sse::new(event_stream(subscription))
		.keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("keep-alive"))
		.into_response()
}

/// Ends on lag as well as on close: the gateway reconnects and registers
/// again, and the replay repairs whatever was skipped.
fn event_stream(mut subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
	async_stream::stream! {
		loop {
			match subscription.recv().await {
				Ok(Some(line)) => yield Ok(Event::default().event(PEER_EVENT).data(line)),
				Ok(None) => break,
				Err(e) => {
					warn!(error = %e, "gateway event stream lagged, closing");
					break;
				}
			}
		}
	}
}
