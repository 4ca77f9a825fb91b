// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event model and delivery transports for the telemetry agent.
//!
//! - [`event`]: the structured [`Event`] produced by hooks and pollers
//! - [`transport`]: the [`Transport`] lifecycle contract
//! - [`registry`]: name-to-constructor lookup used to select the active transport
//! - [`tcp`] / [`udp`]: reference line-oriented `key="value"` transports

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod errors;
pub mod event;
pub mod registry;
pub mod tcp;
pub mod transport;
pub mod udp;

pub use errors::TransportError;
pub use event::{ErrorRecord, Event, EventBuilder, FieldValue};
pub use registry::TransportRegistry;
pub use transport::Transport;

/// Configuration keys under this prefix are forwarded verbatim to the active transport.
pub const TRANSPORT_PREFIX: &str = "collector";
