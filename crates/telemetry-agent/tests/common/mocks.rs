// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock collaborators for driving the agent without a real management interface or collector

use agent_transport::{Event, Transport, TransportError, TransportRegistry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use telemetry_agent::collectors::{
    AttributeReading, ManagementClient, ManagementConnection, ServerSpec, SnapshotParser,
    SnapshotRecord,
};
use telemetry_agent::error::CollectorError;
use telemetry_agent::poller::NotificationSink;

pub const RECORDING_TRANSPORT: &str = "recording";

/// Everything the recording transports built by one registry have seen
#[derive(Default)]
pub struct Recorded {
    pub events: Mutex<Vec<Event>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

#[allow(dead_code)]
impl Recorded {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct RecordingTransport {
    recorded: Arc<Recorded>,
    started: AtomicBool,
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        RECORDING_TRANSPORT
    }

    fn init(&mut self, _config: &HashMap<String, String>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.recorded.starts.fetch_add(1, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.recorded.stops.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
    }

    async fn send(&self, event: &Event) -> Result<(), TransportError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(TransportError::NotStarted);
        }
        self.recorded
            .events
            .lock()
            .expect("events lock")
            .push(event.clone());
        Ok(())
    }
}

/// The bundled transports plus `recording`
pub fn recording_registry() -> (TransportRegistry, Arc<Recorded>) {
    let recorded = Arc::new(Recorded::default());
    let shared = Arc::clone(&recorded);
    let mut registry = TransportRegistry::with_defaults();
    registry.register(RECORDING_TRANSPORT, move || {
        Box::new(RecordingTransport {
            recorded: Arc::clone(&shared),
            started: AtomicBool::new(false),
        })
    });
    (registry, recorded)
}

/// Management client whose remote endpoints are unreachable and whose local polls fail a
/// configurable number of times before succeeding
#[derive(Default)]
pub struct ScriptedManagement {
    pub remote_connects: AtomicUsize,
    pub local_connects: AtomicUsize,
    pub polls: AtomicUsize,
    pub closes: AtomicUsize,
    pub failures_left: AtomicUsize,
    pub readings: Mutex<Vec<AttributeReading>>,
}

#[allow(dead_code)]
impl ScriptedManagement {
    pub fn failing(times: usize, readings: Vec<AttributeReading>) -> Arc<Self> {
        let mock = ScriptedManagement::default();
        mock.failures_left.store(times, Ordering::SeqCst);
        *mock.readings.lock().expect("readings lock") = readings;
        Arc::new(mock)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn local_connects(&self) -> usize {
        self.local_connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Forwards to a shared [`ScriptedManagement`]
pub struct SharedManagement(pub Arc<ScriptedManagement>);

#[async_trait]
impl ManagementClient for SharedManagement {
    async fn connect(
        &self,
        server: &ServerSpec,
    ) -> Result<Box<dyn ManagementConnection>, CollectorError> {
        self.0.remote_connects.fetch_add(1, Ordering::SeqCst);
        Err(CollectorError::Connect {
            endpoint: server.key(),
            reason: "connection refused".to_string(),
        })
    }

    async fn local(&self) -> Result<Box<dyn ManagementConnection>, CollectorError> {
        self.0.local_connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection(Arc::clone(&self.0))))
    }
}

struct ScriptedConnection(Arc<ScriptedManagement>);

#[async_trait]
impl ManagementConnection for ScriptedConnection {
    async fn poll(&mut self, _server: &ServerSpec) -> Result<Vec<AttributeReading>, CollectorError> {
        self.0.polls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .0
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollectorError::Poll("management interface unavailable".to_string()));
        }
        Ok(self.0.readings.lock().expect("readings lock").clone())
    }

    async fn register_notifications(
        &mut self,
        _server: &ServerSpec,
        _sink: NotificationSink,
    ) -> Result<bool, CollectorError> {
        Ok(false)
    }

    async fn dump_snapshot(&mut self, path: &Path, _live: bool) -> Result<(), CollectorError> {
        tokio::fs::write(path, b"snapshot").await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns the same records for every snapshot
pub struct FixedParser(pub Vec<SnapshotRecord>);

impl SnapshotParser for FixedParser {
    fn parse(&self, _path: &Path) -> Result<Vec<SnapshotRecord>, CollectorError> {
        Ok(self.0.clone())
    }
}
