// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Interfaces to the external collaborators the pollers depend on.
//!
//! - [`ManagementClient`] / [`ManagementConnection`]: the management-protocol client used to
//!   poll attributes, subscribe to notifications and trigger snapshot captures
//! - [`SnapshotParser`]: turns a captured snapshot file into records
//! - [`TargetLoader`]: resolves a poller target's document (`<name>.xml`)
//!
//! [`loader`] ships a JSON document loader and an in-memory one. [`procfs`] ships a local-only
//! management client backed by `/proc`.

pub mod loader;
pub mod procfs;

use std::path::Path;
use std::sync::Arc;

use agent_transport::FieldValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollectorError;
use crate::poller::NotificationSink;

/// One endpoint in a target document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: u16,
    /// Object-name patterns (with optional attribute lists) understood by the client.
    #[serde(default)]
    pub queries: Vec<String>,
}

impl ServerSpec {
    /// No host or no port means the in-process management interface.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.port == 0 || self.host.as_deref().map_or(true, |h| h.trim().is_empty())
    }

    /// Stable identity used to remember notification subscriptions.
    #[must_use]
    pub fn key(&self) -> String {
        if self.is_local() {
            "local".to_string()
        } else {
            format!("{}:{}", self.host.as_deref().unwrap_or_default(), self.port)
        }
    }
}

/// How object names are turned into event fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatterKind {
    /// `mbean=<object name>`
    Raw,
    /// `mbean_domain=<domain>` plus `mbean_property_<key>=<value>` per key property
    #[default]
    Tokenized,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDocument {
    pub servers: Vec<ServerSpec>,
    #[serde(default)]
    pub formatter: FormatterKind,
    /// Transport name overriding the agent's queue for this target's events.
    #[serde(default)]
    pub transport: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeReading {
    pub object_name: String,
    pub attribute: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub object_name: String,
    pub notification_type: String,
    pub message: String,
    pub sequence: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub record_type: u8,
    pub sub_record_type: Option<u8>,
    pub fields: Vec<(String, FieldValue)>,
}

#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Connects to a remote endpoint.
    async fn connect(&self, server: &ServerSpec)
        -> Result<Box<dyn ManagementConnection>, CollectorError>;

    /// Connects to this process's own management interface.
    async fn local(&self) -> Result<Box<dyn ManagementConnection>, CollectorError>;
}

#[async_trait]
pub trait ManagementConnection: Send + Sync {
    /// Runs the server's queries.
    async fn poll(&mut self, server: &ServerSpec) -> Result<Vec<AttributeReading>, CollectorError>;

    /// Subscribes `sink` to push notifications. Returns `Ok(false)` when the endpoint has none.
    async fn register_notifications(
        &mut self,
        server: &ServerSpec,
        sink: NotificationSink,
    ) -> Result<bool, CollectorError>;

    /// Writes a heap snapshot to `path`.
    async fn dump_snapshot(&mut self, path: &Path, live: bool) -> Result<(), CollectorError>;

    /// Releases the connection. Called exactly once before the connection is dropped.
    async fn close(&mut self);
}

pub trait SnapshotParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Vec<SnapshotRecord>, CollectorError>;
}

pub trait TargetLoader: Send + Sync {
    /// `config_file` is the target's resolved document name, e.g. `tomcat.xml`.
    fn load(&self, config_file: &str) -> Result<TargetDocument, CollectorError>;
}

/// The collaborators an agent is built with.
#[derive(Clone)]
pub struct Collectors {
    pub management: Arc<dyn ManagementClient>,
    pub snapshot_parser: Arc<dyn SnapshotParser>,
    pub target_loader: Arc<dyn TargetLoader>,
}

impl std::fmt::Debug for Collectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collectors").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_fallback() {
        assert!(ServerSpec::default().is_local());
        let remote = ServerSpec {
            host: Some("db-1".to_string()),
            port: 9010,
            queries: vec![],
        };
        assert!(!remote.is_local());
        assert_eq!(remote.key(), "db-1:9010");
        let no_port = ServerSpec {
            host: Some("db-1".to_string()),
            port: 0,
            queries: vec![],
        };
        assert!(no_port.is_local());
        assert_eq!(no_port.key(), "local");
    }

    #[test]
    fn test_document_defaults() {
        let doc: TargetDocument =
            serde_json::from_str(r#"{"servers":[{"queries":["java.lang:type=Memory"]}]}"#)
                .expect("document");
        assert_eq!(doc.formatter, FormatterKind::Tokenized);
        assert!(doc.transport.is_none());
        assert!(doc.servers[0].is_local());
    }
}
