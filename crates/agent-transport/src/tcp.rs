// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line-oriented TCP transport: one `key="value"` line per event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::event::Event;
use crate::transport::{config_port, config_str, Transport};
use crate::TRANSPORT_PREFIX;

pub const NAME: &str = "tcp";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5150;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    started: AtomicBool,
    stream: Mutex<Option<TcpStream>>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        TcpTransport {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            started: AtomicBool::new(false),
            stream: Mutex::new(None),
        }
    }
}

impl TcpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        let addr = self.addr();
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(TransportError::Connect { addr, source }),
            Err(_) => Err(TransportError::ConnectTimeout(addr)),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn init(&mut self, config: &HashMap<String, String>) -> Result<(), TransportError> {
        self.host = config_str(
            config,
            &format!("{TRANSPORT_PREFIX}.transport.tcp.host"),
            DEFAULT_HOST,
        );
        self.port = config_port(
            config,
            &format!("{TRANSPORT_PREFIX}.transport.tcp.port"),
            DEFAULT_PORT,
        )?;
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        let stream = self.connect().await?;
        *self.stream.lock().await = Some(stream);
        self.started.store(true, Ordering::SeqCst);
        debug!("TCP transport connected to {}", self.addr());
        Ok(())
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        if let Some(mut stream) = self.stream.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Error closing TCP transport: {e}");
            }
        }
    }

    async fn send(&self, event: &Event) -> Result<(), TransportError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(TransportError::NotStarted);
        }
        let mut line = event.to_line();
        line.push('\n');

        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            // the previous write failed; reconnect once before giving up on this event
            *guard = Some(self.connect().await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::NotStarted);
        };
        if let Err(e) = stream.write_all(line.as_bytes()).await {
            warn!("TCP transport write failed, dropping connection: {e}");
            *guard = None;
            return Err(e.into());
        }
        Ok(())
    }
}
