// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Datagram variant of the line transport: one event per UDP packet.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::TransportError;
use crate::event::Event;
use crate::transport::{config_port, config_str, Transport};
use crate::TRANSPORT_PREFIX;

pub const NAME: &str = "udp";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5150;

#[derive(Debug)]
pub struct UdpTransport {
    host: String,
    port: u16,
    socket: RwLock<Option<UdpSocket>>,
}

impl Default for UdpTransport {
    fn default() -> Self {
        UdpTransport {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            socket: RwLock::new(None),
        }
    }
}

impl UdpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self, config: &HashMap<String, String>) -> Result<(), TransportError> {
        self.host = config_str(
            config,
            &format!("{TRANSPORT_PREFIX}.transport.udp.host"),
            DEFAULT_HOST,
        );
        self.port = config_port(
            config,
            &format!("{TRANSPORT_PREFIX}.transport.udp.port"),
            DEFAULT_PORT,
        )?;
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        let addr = format!("{}:{}", self.host, self.port);
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect(&addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;
        *self.socket.write().await = Some(socket);
        debug!("UDP transport targeting {addr}");
        Ok(())
    }

    async fn stop(&self) {
        self.socket.write().await.take();
    }

    async fn send(&self, event: &Event) -> Result<(), TransportError> {
        let guard = self.socket.read().await;
        let socket = guard.as_ref().ok_or(TransportError::NotStarted)?;
        socket.send(event.to_line().as_bytes()).await?;
        Ok(())
    }
}
