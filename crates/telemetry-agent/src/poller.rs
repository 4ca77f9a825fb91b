// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic management-attribute polling, one worker per configured target.
//!
//! A worker sleeps for its interval, then lazily loads the target document and connects to
//! every server in it. Each tick polls all servers concurrently and publishes one
//! `metric_reading` event per attribute value. Any failure closes every connection; the next
//! tick reconnects from scratch. Push notifications are subscribed once per target and server
//! for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use agent_transport::{Event, EventBuilder, Transport};
use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::collectors::{
    AttributeReading, FormatterKind, ManagementConnection, Notification, ServerSpec,
    TargetDocument,
};
use crate::config::PollerTarget;
use crate::context::AgentContext;
use crate::error::CollectorError;
use crate::worker::until_cancelled;

pub const POLLER_SOURCE: &str = "metrics_poller";
pub const READING_EVENT: &str = "metric_reading";
pub const NOTIFICATION_EVENT: &str = "metric_notification";

/// Receives push notifications for one target/server pair and publishes them.
///
/// Outlives the poller that registered it: a stopped or restarted poller does not unsubscribe,
/// so delivery is gated on the current pause state and `trace_jmx` flag instead.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    ctx: Arc<AgentContext>,
    target: String,
    server: ServerSpec,
    formatter: FormatterKind,
}

impl NotificationSink {
    pub(crate) fn new(
        ctx: Arc<AgentContext>,
        target: &str,
        server: &ServerSpec,
        formatter: FormatterKind,
    ) -> Self {
        NotificationSink {
            ctx,
            target: target.to_string(),
            server: server.clone(),
            formatter,
        }
    }

    pub async fn deliver(&self, notification: Notification) {
        if self.ctx.is_paused() || !self.ctx.config().trace_jmx {
            return;
        }
        let event = server_fields(
            Event::builder(NOTIFICATION_EVENT, POLLER_SOURCE),
            &self.target,
            &self.server,
        );
        let event = object_name_fields(event, self.formatter, &notification.object_name)
            .field("notificationType", notification.notification_type)
            .field("message", notification.message)
            .field("sequence", notification.sequence)
            .build();
        if let Err(e) = self.ctx.publish(event).await {
            debug!("Dropped notification for {}: {e}", self.target);
        }
    }
}

struct Endpoint {
    server: ServerSpec,
    connection: Box<dyn ManagementConnection>,
}

/// Connections and document for one target, rebuilt after any failure.
struct Session {
    document: TargetDocument,
    endpoints: Vec<Endpoint>,
    transport: Option<Arc<dyn Transport>>,
}

impl Session {
    /// Loads the document and connects to every server. Returns `None` when `cancel` fires
    /// first; whatever was opened by then is closed before returning.
    async fn open(
        ctx: &Arc<AgentContext>,
        target: &str,
        config_file: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Self>, CollectorError> {
        let document = ctx.collectors().target_loader.load(config_file)?;
        let management = Arc::clone(&ctx.collectors().management);

        let mut session = Session {
            document,
            endpoints: Vec::new(),
            transport: None,
        };
        let servers = session.document.servers.clone();
        for server in servers {
            let connecting = async {
                if server.is_local() {
                    management.local().await
                } else {
                    management.connect(&server).await
                }
            };
            let Some(connected) = until_cancelled(cancel, connecting).await else {
                session.close().await;
                return Ok(None);
            };
            match connected {
                Ok(connection) => session.endpoints.push(Endpoint { server, connection }),
                Err(e) => {
                    session.close().await;
                    return Err(e);
                }
            }
        }

        if let Some(name) = session.document.transport.clone() {
            let config = ctx.config();
            let transport: Arc<dyn Transport> =
                match ctx.registry().create(&name, &config.transport_config) {
                    Ok(transport) => Arc::from(transport),
                    Err(e) => {
                        session.close().await;
                        return Err(e.into());
                    }
                };
            let Some(started) = until_cancelled(cancel, transport.start()).await else {
                transport.stop().await;
                session.close().await;
                return Ok(None);
            };
            if let Err(e) = started {
                session.close().await;
                return Err(e.into());
            }
            session.transport = Some(transport);
        }

        let registered = until_cancelled(
            cancel,
            session.register_notifications(ctx, target, config_file),
        )
        .await;
        if registered.is_none() {
            session.close().await;
            return Ok(None);
        }
        Ok(Some(session))
    }

    async fn register_notifications(
        &mut self,
        ctx: &Arc<AgentContext>,
        target: &str,
        config_file: &str,
    ) {
        let formatter = self.document.formatter;
        for endpoint in &mut self.endpoints {
            let key = format!("{config_file}/{}", endpoint.server.key());
            if ctx.notifications_registered(&key) {
                continue;
            }
            let sink = NotificationSink::new(Arc::clone(ctx), target, &endpoint.server, formatter);
            match endpoint
                .connection
                .register_notifications(&endpoint.server, sink)
                .await
            {
                Ok(subscribed) => {
                    if subscribed {
                        info!("Subscribed to notifications from {key}");
                    }
                    ctx.record_notification_registration(key);
                }
                Err(e) => warn!("Notification subscription for {key} failed: {e}"),
            }
        }
    }

    /// Polls every server concurrently. Readings from healthy servers are published even when
    /// another server fails; the first failure is returned.
    async fn poll(&mut self, ctx: &AgentContext, target: &str) -> Result<usize, CollectorError> {
        let results = join_all(
            self.endpoints
                .iter_mut()
                .map(|endpoint| async move { endpoint.connection.poll(&endpoint.server).await }),
        )
        .await;

        let mut published = 0;
        let mut failure = None;
        for (endpoint, result) in self.endpoints.iter().zip(results) {
            match result {
                Ok(readings) => {
                    for reading in readings {
                        let event = reading_event(target, &endpoint.server, self.document.formatter, reading);
                        if self.publish(ctx, event).await {
                            published += 1;
                        }
                    }
                }
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(published),
        }
    }

    async fn publish(&self, ctx: &AgentContext, event: Event) -> bool {
        if ctx.is_paused() || !ctx.config().trace_jmx {
            return false;
        }
        match &self.transport {
            Some(transport) => match transport.send(&ctx.enrich(event)).await {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to send {READING_EVENT} event: {e}");
                    false
                }
            },
            None => match ctx.publish(event).await {
                Ok(()) => true,
                Err(e) => {
                    debug!("Dropped {READING_EVENT} event: {e}");
                    false
                }
            },
        }
    }

    async fn close(mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.connection.close().await;
        }
        if let Some(transport) = self.transport.take() {
            transport.stop().await;
        }
    }
}

/// Worker body for one target. Runs until `cancel` fires; connections are closed on exit.
pub async fn run(
    ctx: Arc<AgentContext>,
    target: PollerTarget,
    interval: Duration,
    cancel: CancellationToken,
) {
    let config_file = target.config_file();
    let span = tracing::info_span!("metrics_poller", poller = %target.name);
    async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        let mut session: Option<Session> = None;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if session.is_none() {
                match Session::open(&ctx, &target.name, &config_file, &cancel).await {
                    Ok(Some(opened)) => session = Some(opened),
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to open {config_file}: {e}");
                        continue;
                    }
                }
            }

            let Some(current) = session.as_mut() else {
                continue;
            };
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                polled = current.poll(&ctx, &target.name) => polled,
            };
            match polled {
                Ok(published) => debug!("Published {published} readings"),
                Err(e) => {
                    error!("Poll of {config_file} failed, reconnecting next cycle: {e}");
                    if let Some(failed) = session.take() {
                        failed.close().await;
                    }
                }
            }
        }

        if let Some(open) = session.take() {
            open.close().await;
        }
        debug!("Poller stopped");
    }
    .instrument(span)
    .await;
}

fn server_fields(event: EventBuilder, target: &str, server: &ServerSpec) -> EventBuilder {
    event
        .field("target", target)
        .field("host", server.host.as_deref().unwrap_or("local"))
        .field("port", server.port)
}

fn object_name_fields(event: EventBuilder, formatter: FormatterKind, object_name: &str) -> EventBuilder {
    match (formatter, object_name.split_once(':')) {
        (FormatterKind::Tokenized, Some((domain, properties))) => {
            let mut event = event.field("mbean_domain", domain);
            for property in properties.split(',') {
                if let Some((key, value)) = property.split_once('=') {
                    event = event.field(format!("mbean_property_{}", key.trim()), value.trim());
                }
            }
            event
        }
        _ => event.field("mbean", object_name),
    }
}

fn reading_event(
    target: &str,
    server: &ServerSpec,
    formatter: FormatterKind,
    reading: AttributeReading,
) -> Event {
    let event = server_fields(Event::builder(READING_EVENT, POLLER_SOURCE), target, server);
    object_name_fields(event, formatter, &reading.object_name)
        .field("attribute", reading.attribute)
        .field("value", reading.value)
        .build()
}
