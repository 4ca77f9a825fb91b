// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single consumer of the event queue.
//!
//! Every [`DRAIN_INTERVAL`] the worker sends everything currently buffered, one event at a
//! time. A failed send is logged and the event is dropped. On cancellation the pass in
//! progress completes, one final pass runs, and the worker exits.

use std::sync::Arc;
use std::time::Duration;

use agent_transport::Transport;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::queue::EventReceiver;

pub const DRAIN_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run(
    mut rx: EventReceiver,
    transport: Arc<dyn Transport>,
    interval: Duration,
    cancel: CancellationToken,
) {
    debug!("Transport worker running with {} transport", transport.name());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let sent = drain_once(&mut rx, transport.as_ref()).await;
                debug!("Transport worker stopping after final drain of {sent} events");
                break;
            }
            _ = ticker.tick() => {
                drain_once(&mut rx, transport.as_ref()).await;
            }
        }
    }
}

/// Sends at most one queue's worth of events, so a busy producer cannot keep a pass alive forever.
async fn drain_once(rx: &mut EventReceiver, transport: &dyn Transport) -> usize {
    let mut sent = 0;
    for _ in 0..rx.capacity() {
        let Some(event) = rx.try_dequeue() else {
            break;
        };
        match transport.send(&event).await {
            Ok(()) => sent += 1,
            Err(e) => error!("Failed to send {} event: {e}", event.event_type()),
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueFullPolicy;
    use crate::queue;
    use agent_transport::{Event, TransportError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<String>>,
        fail_type: Option<&'static str>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn init(&mut self, _config: &HashMap<String, String>) -> Result<(), TransportError> {
            Ok(())
        }
        async fn start(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn stop(&self) {}
        async fn send(&self, event: &Event) -> Result<(), TransportError> {
            if self.fail_type == Some(event.event_type()) {
                return Err(TransportError::NotStarted);
            }
            self.sent.lock().await.push(event.event_type().to_string());
            Ok(())
        }
    }

    fn event(event_type: &str) -> Event {
        Event::builder(event_type, "telemetry_agent").build()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_send_is_logged_and_loop_continues() {
        let (queue, rx) = queue::channel(8, QueueFullPolicy::Block, CancellationToken::new());
        let transport = Arc::new(RecordingTransport {
            fail_type: Some("bad"),
            ..Default::default()
        });
        for t in ["e1", "bad", "e2"] {
            queue.enqueue(event(t)).await.expect("enqueue");
        }

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run(
            rx,
            transport.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(event("e3")).await.expect("enqueue");
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        worker.await.expect("worker");

        assert_eq!(*transport.sent.lock().await, vec!["e1", "e2", "e3"]);
        assert!(logs_contain("Failed to send bad event"));
    }

    #[tokio::test]
    async fn test_cancel_runs_final_drain() {
        let (queue, rx) = queue::channel(8, QueueFullPolicy::Block, CancellationToken::new());
        let transport = Arc::new(RecordingTransport::default());
        let cancel = CancellationToken::new();
        // long interval: only the first immediate tick and the final drain can send
        let worker = tokio::spawn(run(
            rx,
            transport.clone(),
            Duration::from_secs(3600),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(event("late")).await.expect("enqueue");
        cancel.cancel();
        worker.await.expect("worker");
        assert_eq!(*transport.sent.lock().await, vec!["late"]);
    }
}
