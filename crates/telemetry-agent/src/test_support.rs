// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory collaborators shared by the unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agent_transport::{Event, Transport, TransportError, TransportRegistry};
use async_trait::async_trait;

use crate::collectors::loader::StaticTargetLoader;
use crate::collectors::{
    AttributeReading, Collectors, ManagementClient, ManagementConnection, ServerSpec,
    SnapshotParser, SnapshotRecord,
};
use crate::error::CollectorError;
use crate::poller::NotificationSink;

pub const MOCK_TRANSPORT: &str = "mock";

/// Counters and canned responses behind [`MockManagement`] and [`MockParser`].
#[derive(Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub polls: AtomicUsize,
    pub closes: AtomicUsize,
    pub registrations: AtomicUsize,
    pub dumps: AtomicUsize,
    pub parses: AtomicUsize,
    pub fail_polls: AtomicUsize,
    pub fail_dump: AtomicBool,
    /// Remote `connect` never completes.
    pub hang_connect: AtomicBool,
    /// `dump_snapshot` never completes.
    pub hang_dump: AtomicBool,
    pub notifications: AtomicBool,
    pub readings: Mutex<Vec<AttributeReading>>,
    pub records: Mutex<Vec<SnapshotRecord>>,
    pub sink: Mutex<Option<NotificationSink>>,
}

impl MockState {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn sink(&self) -> Option<NotificationSink> {
        self.sink.lock().expect("sink lock").clone()
    }
}

pub struct MockManagement(pub Arc<MockState>);

#[async_trait]
impl ManagementClient for MockManagement {
    async fn connect(
        &self,
        _server: &ServerSpec,
    ) -> Result<Box<dyn ManagementConnection>, CollectorError> {
        if self.0.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection(Arc::clone(&self.0))))
    }

    async fn local(&self) -> Result<Box<dyn ManagementConnection>, CollectorError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection(Arc::clone(&self.0))))
    }
}

struct MockConnection(Arc<MockState>);

#[async_trait]
impl ManagementConnection for MockConnection {
    async fn poll(&mut self, _server: &ServerSpec) -> Result<Vec<AttributeReading>, CollectorError> {
        self.0.polls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .0
            .fail_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollectorError::Poll("connection reset".to_string()));
        }
        Ok(self.0.readings.lock().expect("readings lock").clone())
    }

    async fn register_notifications(
        &mut self,
        _server: &ServerSpec,
        sink: NotificationSink,
    ) -> Result<bool, CollectorError> {
        self.0.registrations.fetch_add(1, Ordering::SeqCst);
        let supported = self.0.notifications.load(Ordering::SeqCst);
        if supported {
            *self.0.sink.lock().expect("sink lock") = Some(sink);
        }
        Ok(supported)
    }

    async fn dump_snapshot(&mut self, path: &Path, _live: bool) -> Result<(), CollectorError> {
        self.0.dumps.fetch_add(1, Ordering::SeqCst);
        if self.0.hang_dump.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.0.fail_dump.load(Ordering::SeqCst) {
            return Err(CollectorError::Capture("dump refused".to_string()));
        }
        tokio::fs::write(path, b"snapshot").await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockParser(pub Arc<MockState>);

impl SnapshotParser for MockParser {
    fn parse(&self, path: &Path) -> Result<Vec<SnapshotRecord>, CollectorError> {
        self.0.parses.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(CollectorError::Parse(format!("{} missing", path.display())));
        }
        Ok(self.0.records.lock().expect("records lock").clone())
    }
}

pub fn collectors() -> Collectors {
    collectors_with(Arc::new(MockState::default()), StaticTargetLoader::new())
}

pub fn collectors_with(state: Arc<MockState>, loader: StaticTargetLoader) -> Collectors {
    Collectors {
        management: Arc::new(MockManagement(Arc::clone(&state))),
        snapshot_parser: Arc::new(MockParser(state)),
        target_loader: Arc::new(loader),
    }
}

/// What every [`MockTransport`] built from one registry has seen.
#[derive(Default)]
pub struct TransportLog {
    pub sent: Mutex<Vec<Event>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
}

impl TransportLog {
    pub fn sent_types(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }
}

pub struct MockTransport {
    log: Arc<TransportLog>,
    started: AtomicBool,
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        MOCK_TRANSPORT
    }

    fn init(&mut self, _config: &HashMap<String, String>) -> Result<(), TransportError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        if self.log.fail_start.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectTimeout("mock:0".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
        self.started.store(false, Ordering::SeqCst);
    }

    async fn send(&self, event: &Event) -> Result<(), TransportError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(TransportError::NotStarted);
        }
        self.log.sent.lock().expect("sent lock").push(event.clone());
        Ok(())
    }
}

/// The default registry plus a `mock` transport recording into the returned log.
pub fn registry() -> (TransportRegistry, Arc<TransportLog>) {
    let log = Arc::new(TransportLog::default());
    let mut registry = TransportRegistry::with_defaults();
    let shared = Arc::clone(&log);
    registry.register(MOCK_TRANSPORT, move || {
        Box::new(MockTransport {
            log: Arc::clone(&shared),
            started: AtomicBool::new(false),
        })
    });
    (registry, log)
}
