// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide agent state, constructed once and shared by `Arc`.
//!
//! Holds the published [`AgentConfig`] snapshot, the pause gate, the current event queue and
//! the collaborators. Producers only ever read from here; the controller is the only writer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use agent_transport::{Event, TransportRegistry};
use arc_swap::{ArcSwap, ArcSwapOption};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collectors::Collectors;
use crate::config::AgentConfig;
use crate::error::EnqueueError;
use crate::logger::LogLevelControl;
use crate::queue::EventQueue;

pub struct AgentContext {
    config: ArcSwap<AgentConfig>,
    generation: AtomicU64,
    paused: AtomicBool,
    queue: ArcSwapOption<EventQueue>,
    shutdown: CancellationToken,
    registry: TransportRegistry,
    collectors: Collectors,
    log_control: Option<Arc<dyn LogLevelControl>>,
    notification_registrations: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("paused", &self.is_paused())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl AgentContext {
    #[must_use]
    pub fn new(
        config: AgentConfig,
        registry: TransportRegistry,
        collectors: Collectors,
        log_control: Option<Arc<dyn LogLevelControl>>,
    ) -> Self {
        let ctx = AgentContext {
            config: ArcSwap::from_pointee(config.clone()),
            generation: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            queue: ArcSwapOption::empty(),
            shutdown: CancellationToken::new(),
            registry,
            collectors,
            log_control,
            notification_registrations: Mutex::new(HashSet::new()),
        };
        ctx.publish_config(config);
        ctx
    }

    /// The current snapshot. Callers keep using the `Arc` they got even if a newer one is published.
    #[must_use]
    pub fn config(&self) -> Arc<AgentConfig> {
        self.config.load_full()
    }

    /// Stamps the next generation id on `config` and swaps it in.
    pub fn publish_config(&self, mut config: AgentConfig) -> Arc<AgentConfig> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        config.set_generation(generation);
        let config = Arc::new(config);
        self.config.store(Arc::clone(&config));
        config
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    #[must_use]
    pub fn queue(&self) -> Option<Arc<EventQueue>> {
        self.queue.load_full()
    }

    /// Installs a new queue and returns the previous one.
    pub(crate) fn replace_queue(&self, queue: Option<EventQueue>) -> Option<Arc<EventQueue>> {
        self.queue.swap(queue.map(Arc::new))
    }

    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    #[must_use]
    pub fn registry(&self) -> &TransportRegistry {
        &self.registry
    }

    #[must_use]
    pub fn collectors(&self) -> &Collectors {
        &self.collectors
    }

    pub(crate) fn log_control(&self) -> Option<&Arc<dyn LogLevelControl>> {
        self.log_control.as_ref()
    }

    /// Appends `appName`, `appID` and the user tags from the current snapshot.
    #[must_use]
    pub fn enrich(&self, event: Event) -> Event {
        let config = self.config.load();
        event
            .with_tags([
                ("appName", config.app_name.as_str()),
                ("appID", config.app_instance.as_str()),
            ])
            .with_tags(config.user_tags.iter())
    }

    /// Enriches and enqueues, waiting for space when the queue is full.
    pub async fn publish(&self, event: Event) -> Result<(), EnqueueError> {
        let queue = self.queue().ok_or(EnqueueError::Cancelled)?;
        queue.enqueue(self.enrich(event)).await
    }

    /// Thread-blocking [`Self::publish`] for synchronous callers.
    pub fn publish_blocking(&self, event: Event) -> Result<(), EnqueueError> {
        let queue = self.queue().ok_or(EnqueueError::Cancelled)?;
        queue.enqueue_blocking(self.enrich(event))
    }

    #[must_use]
    pub fn notifications_registered(&self, key: &str) -> bool {
        match self.notification_registrations.lock() {
            Ok(set) => set.contains(key),
            Err(poisoned) => poisoned.into_inner().contains(key),
        }
    }

    /// Remembers a subscription so restarted pollers do not subscribe again.
    pub fn record_notification_registration(&self, key: String) {
        match self.notification_registrations.lock() {
            Ok(mut set) => {
                set.insert(key);
            }
            Err(poisoned) => {
                warn!("Notification registry lock was poisoned");
                poisoned.into_inner().insert(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Properties, QueueFullPolicy};
    use crate::queue;
    use crate::test_support::collectors;

    fn context(props: &str) -> AgentContext {
        let config = AgentConfig::from_properties(&Properties::parse(props).expect("props"), None);
        AgentContext::new(config, TransportRegistry::with_defaults(), collectors(), None)
    }

    #[test]
    fn test_publish_config_bumps_generation() {
        let ctx = context("agent.app.name=shop");
        assert_eq!(ctx.config().generation(), 1);
        let held = ctx.config();
        let next = ctx.publish_config(AgentConfig::default());
        assert_eq!(next.generation(), 2);
        assert_eq!(held.app_name, "shop");
        assert_eq!(ctx.config().app_name, "");
    }

    #[tokio::test]
    async fn test_publish_enriches_with_process_tags() {
        let ctx = context("agent.app.name=shop\nagent.app.instance=i-1\nagent.userEventTags=env=prod");
        let (q, mut rx) = queue::channel(4, QueueFullPolicy::Block, CancellationToken::new());
        ctx.replace_queue(Some(q));

        ctx.publish(Event::builder("class_loaded", "telemetry_agent").field("className", "A").build())
            .await
            .expect("publish");
        let event = rx.try_dequeue().expect("event");
        let keys: Vec<&str> = event.fields().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["className", "appName", "appID", "env"]);
    }

    #[tokio::test]
    async fn test_publish_without_queue_is_cancelled() {
        let ctx = context("");
        let event = Event::builder("class_loaded", "telemetry_agent").build();
        assert_eq!(ctx.publish(event).await, Err(EnqueueError::Cancelled));
    }

    #[test]
    fn test_notification_registrations() {
        let ctx = context("");
        assert!(!ctx.notifications_registered("tomcat.xml/local"));
        ctx.record_notification_registration("tomcat.xml/local".to_string());
        assert!(ctx.notifications_registered("tomcat.xml/local"));
    }
}
