// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Types shared by the Wired control plane and its gateway agents.

pub mod api;
pub mod event;
pub mod gateway;
pub mod ip;
pub mod keys;
pub mod secret;

pub use api::ErrorResponse;
pub use event::{is_valid_uid, EventError, PeerAction, PropagationEvent};
pub use gateway::{GatewayId, GatewayRegistrar, GatewayRegistration, InvalidGatewayId, RegistrationError};
pub use ip::{allocate, host_route, IpError, IpPool};
pub use keys::{generate_credentials, Credentials, KeyError, WgKeyPair, WgPresharedKey, WgPrivateKey, WgPublicKey};
pub use secret::{Secret, SecretString};
