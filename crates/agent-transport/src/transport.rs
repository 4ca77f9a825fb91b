// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::event::Event;

/// A pluggable sink that delivers events to a remote collector.
///
/// Lifecycle: `init` once with the forwarded configuration, `start` before the
/// first `send`, `stop` when the agent pauses, reloads or shuts down. Instances
/// are shared behind an `Arc` once started, so `start`, `stop` and `send` take `&self`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name under which the implementation is registered.
    fn name(&self) -> &'static str;

    /// Applies `key -> value` settings. Calling it again with the same map leaves the
    /// transport in the same state.
    fn init(&mut self, config: &HashMap<String, String>) -> Result<(), TransportError>;

    /// Opens whatever connection the transport needs.
    async fn start(&self) -> Result<(), TransportError>;

    /// Flushes and closes. Must be a no-op when `start` never succeeded.
    async fn stop(&self);

    /// Best-effort delivery of one event.
    async fn send(&self, event: &Event) -> Result<(), TransportError>;
}

/// Reads a string setting, falling back to `default` when absent or blank.
pub(crate) fn config_str(config: &HashMap<String, String>, key: &str, default: &str) -> String {
    config
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Reads a port setting. Unparseable values are a configuration error rather than a silent default.
pub(crate) fn config_port(
    config: &HashMap<String, String>,
    key: &str,
    default: u16,
) -> Result<u16, TransportError> {
    match config.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|e| TransportError::InvalidConfig(format!("{key}={raw}: {e}"))),
    }
}
