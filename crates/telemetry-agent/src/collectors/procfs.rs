// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local management client backed by `/proc/self/status`.
//!
//! Each query names a status key (`VmRSS`, `Threads`, ...), or `*` for all of them. Values
//! with a numeric first token are reported as integers, in the file's own unit (`kB` for
//! memory). Remote endpoints, notifications and heap snapshots are not supported;
//! [`UnsupportedSnapshotParser`] is the matching parser.

use std::path::{Path, PathBuf};

use agent_transport::FieldValue;
use async_trait::async_trait;
use tracing::debug;

use super::{
    AttributeReading, ManagementClient, ManagementConnection, ServerSpec, SnapshotParser,
    SnapshotRecord,
};
use crate::error::CollectorError;
use crate::poller::NotificationSink;

const PROC_SELF_STATUS_PATH: &str = "/proc/self/status";
const OBJECT_NAME: &str = "process:type=Status";

#[derive(Debug, Clone)]
pub struct ProcManagementClient {
    status_path: PathBuf,
}

impl Default for ProcManagementClient {
    fn default() -> Self {
        ProcManagementClient {
            status_path: PathBuf::from(PROC_SELF_STATUS_PATH),
        }
    }
}

impl ProcManagementClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_status_path(status_path: impl Into<PathBuf>) -> Self {
        ProcManagementClient {
            status_path: status_path.into(),
        }
    }
}

#[async_trait]
impl ManagementClient for ProcManagementClient {
    async fn connect(
        &self,
        server: &ServerSpec,
    ) -> Result<Box<dyn ManagementConnection>, CollectorError> {
        Err(CollectorError::Connect {
            endpoint: server.key(),
            reason: "the procfs client only serves the local process".to_string(),
        })
    }

    async fn local(&self) -> Result<Box<dyn ManagementConnection>, CollectorError> {
        Ok(Box::new(ProcConnection {
            status_path: self.status_path.clone(),
        }))
    }
}

#[derive(Debug)]
struct ProcConnection {
    status_path: PathBuf,
}

#[async_trait]
impl ManagementConnection for ProcConnection {
    async fn poll(&mut self, server: &ServerSpec) -> Result<Vec<AttributeReading>, CollectorError> {
        let content = tokio::fs::read_to_string(&self.status_path)
            .await
            .map_err(|e| CollectorError::Poll(format!("{}: {e}", self.status_path.display())))?;
        let wants_all = server.queries.is_empty() || server.queries.iter().any(|q| q == "*");

        let readings: Vec<AttributeReading> = parse_status(&content)
            .filter(|(key, _)| wants_all || server.queries.iter().any(|q| q == key))
            .map(|(key, value)| AttributeReading {
                object_name: OBJECT_NAME.to_string(),
                attribute: key.to_string(),
                value,
            })
            .collect();
        debug!("Read {} process attributes", readings.len());
        Ok(readings)
    }

    async fn register_notifications(
        &mut self,
        _server: &ServerSpec,
        _sink: NotificationSink,
    ) -> Result<bool, CollectorError> {
        Ok(false)
    }

    async fn dump_snapshot(&mut self, _path: &Path, _live: bool) -> Result<(), CollectorError> {
        Err(CollectorError::Capture(
            "heap snapshots are not supported by the procfs client".to_string(),
        ))
    }

    async fn close(&mut self) {}
}

/// Rejects every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedSnapshotParser;

impl SnapshotParser for UnsupportedSnapshotParser {
    fn parse(&self, path: &Path) -> Result<Vec<SnapshotRecord>, CollectorError> {
        Err(CollectorError::Parse(format!(
            "no snapshot parser available for {}",
            path.display()
        )))
    }
}

fn parse_status(content: &str) -> impl Iterator<Item = (&str, FieldValue)> {
    content.lines().filter_map(|line| {
        let (key, raw) = line.split_once(':')?;
        let raw = raw.trim();
        let value = raw
            .split_whitespace()
            .next()
            .and_then(|first| first.parse::<i64>().ok())
            .map_or_else(|| FieldValue::from(raw), FieldValue::Int);
        Some((key.trim(), value))
    })
}
