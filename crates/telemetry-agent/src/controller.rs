// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent lifecycle: start, pause/unpause, hot reload, attribute changes and shutdown.
//!
//! All transitions are serialized by one async mutex, so a reload can never interleave with a
//! pause. Producers never take that lock; they only read the published snapshot and pause gate
//! on [`AgentContext`].
//!
//! ```text
//!            start                pause
//! Starting --------> Running <----------> Paused
//!                       |        unpause     |
//!                       +------> Stopped <---+
//!                       shutdown
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_transport::{Transport, TransportError};
use futures::future::join_all;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::admin;
use crate::config::attributes::Effect;
use crate::config::{AgentConfig, Attribute};
use crate::context::AgentContext;
use crate::error::{AgentError, ControlError};
use crate::hooks::HookBridge;
use crate::poller;
use crate::queue;
use crate::sampler;
use crate::transport_worker::{self, DRAIN_INTERVAL};
use crate::watcher;
use crate::worker::WorkerHandle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Starting,
    Running,
    Paused,
    Stopped,
}

/// Point-in-time view returned by [`AgentController::status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub state: AgentState,
    pub generation: u64,
    pub transport: Option<String>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub pollers: Vec<String>,
    pub sampler_running: bool,
    pub admin_address: Option<SocketAddr>,
}

#[derive(Default)]
struct Lifecycle {
    state: AgentState,
    transport: Option<Arc<dyn Transport>>,
    transport_worker: Option<WorkerHandle>,
    pollers: Vec<WorkerHandle>,
    sampler: Option<WorkerHandle>,
    watcher: Option<WorkerHandle>,
    admin: Option<WorkerHandle>,
    admin_addr: Option<SocketAddr>,
    config_path: Option<PathBuf>,
}

pub struct AgentController {
    ctx: Arc<AgentContext>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for AgentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentController")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl AgentController {
    #[must_use]
    pub fn new(ctx: Arc<AgentContext>) -> Arc<Self> {
        Arc::new(AgentController {
            ctx,
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    #[must_use]
    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    /// The callbacks the instrumentation layer invokes.
    #[must_use]
    pub fn hook_bridge(&self) -> HookBridge {
        HookBridge::new(Arc::clone(&self.ctx))
    }

    /// Brings the agent from `Starting` to `Running` (or `Paused` when `agent.startPaused` is set).
    ///
    /// Transport and admin-endpoint failures are returned and leave the agent inert. When
    /// `config_path` is given the file is watched and reloaded on change.
    pub async fn start(self: &Arc<Self>, config_path: Option<PathBuf>) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            AgentState::Starting => {}
            AgentState::Stopped => return Err(AgentError::Stopped),
            AgentState::Running | AgentState::Paused => {
                debug!("Agent already started");
                return Ok(());
            }
        }

        let config = self.ctx.config();
        self.apply_log_level(&config);

        let listener = match config.admin_port {
            Some(port) => Some(
                TcpListener::bind(("127.0.0.1", port))
                    .await
                    .map_err(AgentError::AdminBind)?,
            ),
            None => None,
        };

        let transport = self.build_transport(&config)?;
        if !config.start_paused {
            transport.start().await?;
        }
        self.install_pipeline(&mut lifecycle, transport, &config);
        self.enter(&mut lifecycle, &config);

        let shutdown = self.ctx.shutdown_token();
        if let Some(path) = config_path {
            let controller = Arc::downgrade(self);
            let watched = path.clone();
            let interval = Duration::from_secs(config.watch_interval_secs);
            lifecycle.watcher = Some(WorkerHandle::spawn("config_watcher", shutdown, move |cancel| {
                watcher::run(controller, watched, interval, cancel)
            }));
            lifecycle.config_path = Some(path);
        }
        if let Some(listener) = listener {
            match listener.local_addr() {
                Ok(addr) => {
                    info!("Admin endpoint listening on {addr}");
                    lifecycle.admin_addr = Some(addr);
                }
                Err(e) => warn!("Admin endpoint address unavailable: {e}"),
            }
            let controller = Arc::downgrade(self);
            lifecycle.admin = Some(WorkerHandle::spawn("admin", shutdown, move |cancel| {
                admin::serve(listener, controller, cancel)
            }));
        }

        info!(
            "Agent started in {:?} state with {} transport",
            lifecycle.state, config.transport_impl
        );
        Ok(())
    }

    /// Stops the transport and every poller. Pausing an already paused agent does nothing.
    pub async fn pause(&self) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            AgentState::Running => {}
            AgentState::Stopped => return Err(AgentError::Stopped),
            AgentState::Starting | AgentState::Paused => {
                debug!("Agent not running, ignoring pause");
                return Ok(());
            }
        }
        self.ctx.set_paused(true);
        Self::stop_pollers_locked(&mut lifecycle).await;
        Self::stop_sampler_locked(&mut lifecycle).await;
        if let Some(transport) = &lifecycle.transport {
            transport.stop().await;
        }
        lifecycle.state = AgentState::Paused;
        info!("Agent paused");
        Ok(())
    }

    /// Restarts the transport, then the enabled pollers. Unpausing a running agent does nothing.
    pub async fn unpause(&self) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            AgentState::Paused => {}
            AgentState::Stopped => return Err(AgentError::Stopped),
            AgentState::Starting | AgentState::Running => {
                debug!("Agent not paused, ignoring unpause");
                return Ok(());
            }
        }
        if let Some(transport) = &lifecycle.transport {
            transport.start().await?;
        }
        let config = self.ctx.config();
        self.ctx.set_paused(false);
        lifecycle.state = AgentState::Running;
        self.spawn_pollers(&mut lifecycle, &config);
        self.spawn_sampler(&mut lifecycle, &config);
        info!("Agent unpaused");
        Ok(())
    }

    /// Reparses `path` and applies it with [`Self::reload`]. Unreadable or malformed files leave
    /// the running configuration untouched.
    pub async fn reload_from_file(&self, path: &Path) -> Result<(), AgentError> {
        let config = AgentConfig::from_file(path, Some(&self.ctx.config()))?;
        self.reload(config).await
    }

    /// Reloads the file the agent was started with.
    pub async fn reload_config_file(&self) -> Result<(), AgentError> {
        let path = self
            .lifecycle
            .lock()
            .await
            .config_path
            .clone()
            .ok_or(AgentError::NoConfigFile)?;
        self.reload_from_file(&path).await
    }

    /// Swaps in a new configuration.
    ///
    /// The new transport is constructed first; if that fails nothing is torn down. Otherwise
    /// everything running is stopped (the old queue is drained through the old transport),
    /// the snapshot is published and the agent comes back up in the state the new
    /// configuration's `agent.startPaused` asks for.
    pub async fn reload(&self, config: AgentConfig) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            AgentState::Stopped => return Err(AgentError::Stopped),
            AgentState::Starting => {
                let config = self.ctx.publish_config(config);
                debug!("Published configuration generation {} before start", config.generation());
                return Ok(());
            }
            AgentState::Running | AgentState::Paused => {}
        }

        let transport = self.build_transport(&config)?;
        info!("Reloading configuration");
        self.teardown(&mut lifecycle).await;

        let config = self.ctx.publish_config(config);
        self.apply_log_level(&config);
        let started = if config.start_paused {
            Ok(())
        } else {
            transport.start().await
        };
        self.install_pipeline(&mut lifecycle, transport, &config);
        if let Err(e) = started {
            // stays paused; unpause retries the transport
            self.ctx.set_paused(true);
            lifecycle.state = AgentState::Paused;
            return Err(e.into());
        }
        self.enter(&mut lifecycle, &config);
        info!(
            "Configuration generation {} applied, agent {:?}",
            config.generation(),
            lifecycle.state
        );
        Ok(())
    }

    pub async fn start_pollers(&self) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        Self::ensure_alive(&lifecycle)?;
        let config = self.ctx.config();
        if !config.trace_jmx {
            info!("trace.jmx is disabled, not starting pollers");
        } else if lifecycle.state != AgentState::Running {
            debug!("Agent not running, pollers start on unpause");
        } else {
            self.spawn_pollers(&mut lifecycle, &config);
        }
        Ok(())
    }

    pub async fn stop_pollers(&self) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        Self::ensure_alive(&lifecycle)?;
        Self::stop_pollers_locked(&mut lifecycle).await;
        Ok(())
    }

    pub async fn start_sampler(&self) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        Self::ensure_alive(&lifecycle)?;
        let config = self.ctx.config();
        if !config.trace_hprof {
            info!("trace.hprof is disabled, not starting snapshot sampler");
        } else if lifecycle.state != AgentState::Running {
            debug!("Agent not running, snapshot sampler starts on unpause");
        } else {
            self.spawn_sampler(&mut lifecycle, &config);
        }
        Ok(())
    }

    pub async fn stop_sampler(&self) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock().await;
        Self::ensure_alive(&lifecycle)?;
        Self::stop_sampler_locked(&mut lifecycle).await;
        Ok(())
    }

    /// Stops every worker, drains the queue through the transport and closes it.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == AgentState::Stopped {
            return;
        }
        lifecycle.state = AgentState::Stopped;
        if let Some(watcher) = lifecycle.watcher.take() {
            watcher.stop().await;
        }
        if let Some(admin) = lifecycle.admin.take() {
            admin.stop().await;
        }
        lifecycle.admin_addr = None;
        self.teardown(&mut lifecycle).await;
        self.ctx.shutdown_token().cancel();
        info!("Agent stopped");
    }

    pub async fn state(&self) -> AgentState {
        self.lifecycle.lock().await.state
    }

    pub async fn status(&self) -> AgentStatus {
        let lifecycle = self.lifecycle.lock().await;
        let config = self.ctx.config();
        let queue = self.ctx.queue();
        AgentStatus {
            state: lifecycle.state,
            generation: config.generation(),
            transport: lifecycle.transport.as_ref().map(|t| t.name().to_string()),
            queue_depth: queue.as_ref().map_or(0, |q| q.len()),
            queue_capacity: queue.as_ref().map_or(config.queue_capacity, |q| q.capacity()),
            pollers: lifecycle.pollers.iter().map(|p| p.name().to_string()).collect(),
            sampler_running: lifecycle.sampler.is_some(),
            admin_address: lifecycle.admin_addr,
        }
    }

    #[must_use]
    pub fn attribute(&self, attribute: Attribute) -> String {
        self.ctx.config().attribute(attribute)
    }

    /// Every attribute with its current value, in declaration order.
    #[must_use]
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let config = self.ctx.config();
        Attribute::ALL
            .into_iter()
            .map(|a| (a.name(), config.attribute(a)))
            .collect()
    }

    /// Validates and publishes one attribute, then refreshes the components it affects.
    pub async fn set_attribute(&self, attribute: Attribute, value: &str) -> Result<(), ControlError> {
        let mut lifecycle = self.lifecycle.lock().await;
        Self::ensure_alive(&lifecycle)?;
        let next = self.ctx.config().with_attribute(attribute, value)?;
        let config = self.ctx.publish_config(next);

        match attribute.effect() {
            Effect::None => {}
            Effect::Logging => self.apply_log_level(&config),
            Effect::Pollers => {
                Self::stop_pollers_locked(&mut lifecycle).await;
                if lifecycle.state == AgentState::Running {
                    self.spawn_pollers(&mut lifecycle, &config);
                }
            }
            Effect::Sampler => {
                Self::stop_sampler_locked(&mut lifecycle).await;
                if lifecycle.state == AgentState::Running {
                    self.spawn_sampler(&mut lifecycle, &config);
                }
            }
        }
        info!("Set {attribute} to '{}'", config.attribute(attribute));
        Ok(())
    }

    pub async fn set_attribute_named(&self, name: &str, value: &str) -> Result<(), ControlError> {
        self.set_attribute(name.parse()?, value).await
    }

    fn ensure_alive(lifecycle: &Lifecycle) -> Result<(), AgentError> {
        match lifecycle.state {
            AgentState::Stopped => Err(AgentError::Stopped),
            _ => Ok(()),
        }
    }

    fn build_transport(&self, config: &AgentConfig) -> Result<Arc<dyn Transport>, TransportError> {
        self.ctx
            .registry()
            .create(&config.transport_impl, &config.transport_config)
            .map(Arc::from)
    }

    fn apply_log_level(&self, config: &AgentConfig) {
        if let Some(control) = self.ctx.log_control() {
            if let Err(e) = control.set_level(config.logging_level) {
                warn!("Failed to apply logging level {}: {e}", config.logging_level);
            }
        }
    }

    /// Creates a fresh queue and the transport worker that drains it.
    fn install_pipeline(
        &self,
        lifecycle: &mut Lifecycle,
        transport: Arc<dyn Transport>,
        config: &AgentConfig,
    ) {
        let shutdown = self.ctx.shutdown_token();
        let (queue, rx) = queue::channel(
            config.queue_capacity,
            config.queue_full_policy,
            shutdown.child_token(),
        );
        if let Some(stale) = self.ctx.replace_queue(Some(queue)) {
            stale.close();
        }
        let worker_transport = Arc::clone(&transport);
        lifecycle.transport_worker = Some(WorkerHandle::spawn(
            "transport_worker",
            shutdown,
            move |cancel| transport_worker::run(rx, worker_transport, DRAIN_INTERVAL, cancel),
        ));
        lifecycle.transport = Some(transport);
    }

    /// Opens the pause gate (or not) and starts the workers the configuration enables.
    fn enter(&self, lifecycle: &mut Lifecycle, config: &AgentConfig) {
        self.ctx.set_paused(config.start_paused);
        if config.start_paused {
            lifecycle.state = AgentState::Paused;
        } else {
            lifecycle.state = AgentState::Running;
            self.spawn_pollers(lifecycle, config);
            self.spawn_sampler(lifecycle, config);
        }
    }

    /// Pause-equivalent teardown used by reload and shutdown.
    async fn teardown(&self, lifecycle: &mut Lifecycle) {
        self.ctx.set_paused(true);
        Self::stop_pollers_locked(lifecycle).await;
        Self::stop_sampler_locked(lifecycle).await;
        if let Some(queue) = self.ctx.replace_queue(None) {
            queue.close();
        }
        if let Some(worker) = lifecycle.transport_worker.take() {
            worker.stop().await;
        }
        if let Some(transport) = lifecycle.transport.take() {
            transport.stop().await;
        }
    }

    fn spawn_pollers(&self, lifecycle: &mut Lifecycle, config: &AgentConfig) {
        if !config.trace_jmx || !lifecycle.pollers.is_empty() {
            return;
        }
        for target in &config.jmx_targets {
            let ctx = Arc::clone(&self.ctx);
            let interval = Duration::from_secs(config.target_frequency_secs(target));
            let target = target.clone();
            lifecycle.pollers.push(WorkerHandle::spawn(
                format!("poller:{}", target.name),
                self.ctx.shutdown_token(),
                move |cancel| poller::run(ctx, target, interval, cancel),
            ));
        }
    }

    fn spawn_sampler(&self, lifecycle: &mut Lifecycle, config: &AgentConfig) {
        if !config.trace_hprof || lifecycle.sampler.is_some() {
            return;
        }
        let ctx = Arc::clone(&self.ctx);
        let path = config.hprof_file.clone();
        let interval = Duration::from_secs(config.hprof_frequency_secs);
        lifecycle.sampler = Some(WorkerHandle::spawn(
            "snapshot_sampler",
            self.ctx.shutdown_token(),
            move |cancel| sampler::run(ctx, path, interval, cancel),
        ));
    }

    async fn stop_pollers_locked(lifecycle: &mut Lifecycle) {
        join_all(lifecycle.pollers.drain(..).map(WorkerHandle::stop)).await;
    }

    async fn stop_sampler_locked(lifecycle: &mut Lifecycle) {
        if let Some(sampler) = lifecycle.sampler.take() {
            sampler.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Properties;
    use crate::test_support::{self, collectors, TransportLog};
    use agent_transport::Event;
    use std::sync::atomic::Ordering;

    fn controller(props: &str) -> (Arc<AgentController>, Arc<TransportLog>) {
        let props = Properties::parse(&format!("collector.transport.impl=mock\n{props}")).expect("props");
        let (registry, log) = test_support::registry();
        let ctx = AgentContext::new(AgentConfig::from_properties(&props, None), registry, collectors(), None);
        (AgentController::new(Arc::new(ctx)), log)
    }

    fn event() -> Event {
        Event::builder("class_loaded", "telemetry_agent").build()
    }

    #[tokio::test]
    async fn test_start_and_shutdown_drains_queue() {
        let (controller, log) = controller("");
        controller.start(None).await.expect("start");
        assert_eq!(controller.state().await, AgentState::Running);

        controller.context().publish(event()).await.expect("publish");
        controller.shutdown().await;
        assert_eq!(controller.state().await, AgentState::Stopped);
        assert_eq!(log.sent_types(), vec!["class_loaded".to_string()]);
        assert_eq!(log.stops.load(Ordering::SeqCst), 1);
        assert!(controller.context().queue().is_none());
    }

    #[tokio::test]
    async fn test_pause_is_idempotent() {
        let (controller, log) = controller("");
        controller.start(None).await.expect("start");
        controller.pause().await.expect("pause");
        controller.pause().await.expect("pause again");
        assert_eq!(log.stops.load(Ordering::SeqCst), 1);
        assert!(controller.context().is_paused());

        controller.unpause().await.expect("unpause");
        controller.unpause().await.expect("unpause again");
        assert_eq!(log.starts.load(Ordering::SeqCst), 2);
        assert!(!controller.context().is_paused());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_paused_skips_transport_start() {
        let (controller, log) = controller("agent.startPaused=true");
        controller.start(None).await.expect("start");
        assert_eq!(controller.state().await, AgentState::Paused);
        assert_eq!(log.starts.load(Ordering::SeqCst), 0);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_transport_is_fatal() {
        let props = Properties::parse("collector.transport.impl=carrier-pigeon").expect("props");
        let ctx = AgentContext::new(
            AgentConfig::from_properties(&props, None),
            agent_transport::TransportRegistry::with_defaults(),
            collectors(),
            None,
        );
        let controller = AgentController::new(Arc::new(ctx));
        assert!(matches!(
            controller.start(None).await,
            Err(AgentError::Transport(TransportError::UnknownTransport(_)))
        ));
        assert_eq!(controller.state().await, AgentState::Starting);
        assert!(controller.context().queue().is_none());
    }

    #[tokio::test]
    async fn test_reload_with_bad_transport_keeps_running_config() {
        let (controller, _log) = controller("agent.app.name=shop");
        controller.start(None).await.expect("start");
        let props = Properties::parse("collector.transport.impl=nope\nagent.app.name=other").expect("props");
        let result = controller
            .reload(AgentConfig::from_properties(&props, None))
            .await;
        assert!(matches!(result, Err(AgentError::Transport(_))));
        assert_eq!(controller.context().config().app_name, "shop");
        assert_eq!(controller.context().config().generation(), 1);
        assert_eq!(controller.state().await, AgentState::Running);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_follows_new_start_paused() {
        let (controller, log) = controller("");
        controller.start(None).await.expect("start");
        let props = Properties::parse("collector.transport.impl=mock\nagent.startPaused=true").expect("props");
        controller
            .reload(AgentConfig::from_properties(&props, None))
            .await
            .expect("reload");
        assert_eq!(controller.state().await, AgentState::Paused);
        assert_eq!(controller.context().config().generation(), 2);
        assert_eq!(log.starts.load(Ordering::SeqCst), 1);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_attribute_publishes_snapshot() {
        let (controller, _log) = controller("");
        controller.start(None).await.expect("start");
        controller
            .set_attribute_named("appName", "checkout")
            .await
            .expect("set");
        assert_eq!(controller.attribute(Attribute::AppName), "checkout");
        assert_eq!(controller.context().config().generation(), 2);
        assert!(matches!(
            controller.set_attribute_named("traceJMX", "maybe").await,
            Err(ControlError::InvalidValue { .. })
        ));
        assert!(matches!(
            controller.set_attribute_named("bogus", "1").await,
            Err(ControlError::UnknownAttribute(_))
        ));
        controller.shutdown().await;
        assert!(matches!(
            controller.set_attribute_named("appName", "late").await,
            Err(ControlError::Agent(AgentError::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_pollers_follow_trace_jmx() {
        let (controller, _log) = controller("trace.jmx.configfiles=tomcat,kafka");
        controller.start(None).await.expect("start");
        assert!(controller.status().await.pollers.is_empty());

        controller.set_attribute(Attribute::TraceJmx, "true").await.expect("set");
        assert_eq!(
            controller.status().await.pollers,
            vec!["poller:tomcat".to_string(), "poller:kafka".to_string()]
        );

        controller.pause().await.expect("pause");
        assert!(controller.status().await.pollers.is_empty());
        controller.unpause().await.expect("unpause");
        assert_eq!(controller.status().await.pollers.len(), 2);

        controller.stop_pollers().await.expect("stop");
        assert!(controller.status().await.pollers.is_empty());
        controller.shutdown().await;
    }
}
