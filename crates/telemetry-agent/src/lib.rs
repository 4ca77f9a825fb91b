// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process telemetry agent.
//!
//! Instrumentation callbacks ([`hooks::HookBridge`]) and background pollers ([`poller`],
//! [`sampler`]) turn runtime activity into [`agent_transport::Event`]s. Events pass the
//! class filter ([`filter`]), are enriched with process-wide tags, buffered in a bounded
//! queue ([`queue`]) and drained by a single worker ([`transport_worker`]) into the selected
//! transport. [`controller::AgentController`] owns the lifecycle: start, pause/unpause,
//! hot reload from a properties file ([`watcher`]) and runtime attribute changes, also
//! reachable over a loopback HTTP endpoint ([`admin`]).

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod admin;
pub mod collectors;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod logger;
pub mod poller;
pub mod queue;
pub mod sampler;
pub mod transport_worker;
pub mod watcher;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::AgentConfig;
pub use context::AgentContext;
pub use controller::{AgentController, AgentState, AgentStatus};
pub use hooks::{HookBridge, SourceLocation};
