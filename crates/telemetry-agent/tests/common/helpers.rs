// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use telemetry_agent::collectors::loader::StaticTargetLoader;
use telemetry_agent::collectors::Collectors;
use telemetry_agent::config::Properties;
use telemetry_agent::{AgentConfig, AgentContext, AgentController};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::mocks::{recording_registry, FixedParser, Recorded, ScriptedManagement, SharedManagement};

/// Collaborators backed by a [`ScriptedManagement`] that never fails
#[allow(dead_code)]
pub fn collectors(loader: StaticTargetLoader) -> Collectors {
    collectors_with(ScriptedManagement::failing(0, vec![]), loader)
}

pub fn collectors_with(management: Arc<ScriptedManagement>, loader: StaticTargetLoader) -> Collectors {
    Collectors {
        management: Arc::new(SharedManagement(management)),
        snapshot_parser: Arc::new(FixedParser(vec![])),
        target_loader: Arc::new(loader),
    }
}

/// An agent using the `recording` transport, not yet started
pub fn agent(properties: &str, collectors: Collectors) -> (Arc<AgentController>, Arc<Recorded>) {
    let props = Properties::parse(&format!(
        "collector.transport.impl=recording\n{properties}"
    ))
    .expect("Failed to parse test properties");
    let (registry, recorded) = recording_registry();
    let ctx = AgentContext::new(
        AgentConfig::from_properties(&props, None),
        registry,
        collectors,
        None,
    );
    (AgentController::new(Arc::new(ctx)), recorded)
}

#[allow(dead_code)]
pub fn write_properties(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("agent.properties");
    std::fs::write(&path, content).expect("Failed to write properties");
    path
}

/// Polls `condition` every 20ms until it holds or `limit` elapses
pub async fn wait_for<F, Fut>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(limit, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

/// Sends a one-shot HTTP/1.1 request and returns the raw response
#[allow(dead_code)]
pub async fn http_request(addr: SocketAddr, method: &str, path: &str, body: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("Failed to connect to admin endpoint");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream
        .write_all(request.as_bytes())
        .await
        .expect("Failed to write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("Failed to read response");
    response
}
