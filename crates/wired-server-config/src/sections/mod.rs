// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod gateways;
mod groups;
mod http;
mod lease;
mod logging;
mod store;

pub use gateways::{GatewayAgentConfig, GatewayAgentConfigLayer};
pub use groups::{GroupsConfig, GroupsConfigLayer};
pub use http::{HttpConfig, HttpConfigLayer};
pub use lease::{LeaseConfig, LeaseConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use store::{StoreBackend, StoreConfig, StoreConfigLayer};
