// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded many-producer/single-consumer event queue.
//!
//! Producers either await space ([`EventQueue::enqueue`]) or block their thread
//! ([`EventQueue::enqueue_blocking`]) when the queue is full, unless the queue was built with
//! [`QueueFullPolicy::Drop`]. Cancelling the queue's token wakes every waiting producer and
//! their events are dropped. Only the transport worker owns the [`EventReceiver`].

use agent_transport::Event;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::config::QueueFullPolicy;
use crate::error::EnqueueError;

/// Creates a queue holding at most `capacity` events. `capacity` must be non-zero.
#[must_use]
pub fn channel(
    capacity: usize,
    policy: QueueFullPolicy,
    cancel: CancellationToken,
) -> (EventQueue, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventQueue {
            tx,
            capacity,
            policy,
            cancel,
        },
        EventReceiver { rx, capacity },
    )
}

#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
    capacity: usize,
    policy: QueueFullPolicy,
    cancel: CancellationToken,
}

impl EventQueue {
    /// Waits for space under [`QueueFullPolicy::Block`]; fails fast under [`QueueFullPolicy::Drop`].
    pub async fn enqueue(&self, event: Event) -> Result<(), EnqueueError> {
        if self.policy == QueueFullPolicy::Drop {
            return self.try_enqueue(event);
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(EnqueueError::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| EnqueueError::Cancelled),
        }
    }

    /// Thread-blocking variant of [`Self::enqueue`] for synchronous callers. Usable from any
    /// thread, including ones outside the runtime.
    pub fn enqueue_blocking(&self, event: Event) -> Result<(), EnqueueError> {
        futures::executor::block_on(self.enqueue(event))
    }

    pub fn try_enqueue(&self, event: Event) -> Result<(), EnqueueError> {
        if self.cancel.is_cancelled() {
            return Err(EnqueueError::Cancelled);
        }
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Cancelled,
        })
    }

    /// Unblocks all waiting producers; later enqueues fail with [`EnqueueError::Cancelled`].
    pub fn close(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Number of events currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity.saturating_sub(self.tx.capacity())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn policy(&self) -> QueueFullPolicy {
        self.policy
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
    capacity: usize,
}

impl EventReceiver {
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest buffered event, if any, without waiting.
    pub fn try_dequeue(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits for the next event; `None` once every producer handle is gone and the queue is empty.
    pub async fn dequeue(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Everything currently buffered, oldest first.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_dequeue()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn event(n: i64) -> Event {
        Event::builder("class_loaded", "telemetry_agent")
            .field("seq", n)
            .build()
    }

    fn seq(event: &Event) -> Option<i64> {
        match event.field("seq") {
            Some(agent_transport::FieldValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut rx) = channel(8, QueueFullPolicy::Block, CancellationToken::new());
        for n in 1..=3 {
            queue.enqueue(event(n)).await.expect("enqueue");
        }
        assert_eq!(queue.len(), 3);
        let drained: Vec<_> = rx.drain().iter().filter_map(seq).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_blocks_until_dequeue() {
        let (queue, mut rx) = channel(2, QueueFullPolicy::Block, CancellationToken::new());
        let done = Arc::new(AtomicUsize::new(0));

        let producer = {
            let queue = queue.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                for n in 1..=3 {
                    queue.enqueue_blocking(event(n)).expect("enqueue");
                    done.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(queue.len(), 2);

        let first = rx.try_dequeue().expect("first");
        producer.join().expect("producer");
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(queue.len() <= queue.capacity());

        let mut order = vec![seq(&first).expect("seq")];
        order.extend(rx.drain().iter().filter_map(seq));
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_cancel_unblocks_waiting_producer() {
        let cancel = CancellationToken::new();
        let (queue, _rx) = channel(1, QueueFullPolicy::Block, cancel.clone());
        queue.try_enqueue(event(1)).expect("first fits");

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.enqueue_blocking(event(2)))
        };
        std::thread::sleep(Duration::from_millis(100));
        cancel.cancel();
        assert_eq!(
            producer.join().expect("producer"),
            Err(EnqueueError::Cancelled)
        );
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_drop_policy_fails_fast() {
        let (queue, _rx) = channel(1, QueueFullPolicy::Drop, CancellationToken::new());
        queue.enqueue(event(1)).await.expect("first fits");
        assert_eq!(queue.enqueue(event(2)).await, Err(EnqueueError::Full));
    }

    #[tokio::test]
    async fn test_closed_receiver_cancels() {
        let (queue, rx) = channel(1, QueueFullPolicy::Block, CancellationToken::new());
        drop(rx);
        assert_eq!(queue.enqueue(event(1)).await, Err(EnqueueError::Cancelled));
    }
}
