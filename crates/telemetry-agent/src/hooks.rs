// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry points called by the instrumentation layer.
//!
//! Every callback is synchronous. It checks the trace flag for its event kind, the pause gate
//! and the class filter, then builds and enqueues an event. Nothing escapes back into
//! instrumented code: enqueue failures are logged and panics are caught at this boundary.

use std::panic::{catch_unwind, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agent_transport::{ErrorRecord, Event};
use tracing::{debug, error};

use crate::config::AgentConfig;
use crate::context::AgentContext;

pub const HOOK_SOURCE: &str = "telemetry_agent";

/// Exception details passed to [`HookBridge::on_throwable_caught`].
pub type ThrowableInfo = ErrorRecord;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Call site reported with `method_entered` events as `sourceFileName` and `lineNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation<'a> {
    pub file: &'a str,
    pub line: u32,
}

impl From<&'static Location<'static>> for SourceLocation<'static> {
    fn from(location: &'static Location<'static>) -> Self {
        SourceLocation {
            file: location.file(),
            line: location.line(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookKind {
    ClassLoaded,
    MethodEntered,
    MethodExited,
    ThrowableCaught,
}

impl HookKind {
    fn event_type(self) -> &'static str {
        match self {
            HookKind::ClassLoaded => "class_loaded",
            HookKind::MethodEntered => "method_entered",
            HookKind::MethodExited => "method_exited",
            HookKind::ThrowableCaught => "throwable_caught",
        }
    }

    fn enabled(self, config: &AgentConfig) -> bool {
        match self {
            HookKind::ClassLoaded => config.trace_class_loaded,
            HookKind::MethodEntered => config.trace_method_entered,
            HookKind::MethodExited => config.trace_method_exited,
            HookKind::ThrowableCaught => config.trace_errors,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HookBridge {
    ctx: Arc<AgentContext>,
}

impl HookBridge {
    #[must_use]
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        HookBridge { ctx }
    }

    pub fn on_class_loaded(&self, class_name: &str) {
        self.emit(HookKind::ClassLoaded, class_name, |event| {
            event.field("className", class_name).build()
        });
    }

    /// Records the caller of this function as the event's source location.
    #[track_caller]
    pub fn on_method_entered(&self, class_name: &str, method_name: &str, descriptor: &str) {
        let caller = SourceLocation::from(Location::caller());
        self.on_method_entered_at(class_name, method_name, descriptor, caller);
    }

    /// Like [`HookBridge::on_method_entered`], with the call site supplied by the
    /// instrumentation layer.
    pub fn on_method_entered_at(
        &self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        location: SourceLocation<'_>,
    ) {
        self.emit(HookKind::MethodEntered, class_name, |event| {
            with_method_fields(event, class_name, method_name, descriptor)
                .field("lineNumber", location.line)
                .field("sourceFileName", location.file)
                .build()
        });
    }

    pub fn on_method_exited(&self, class_name: &str, method_name: &str, descriptor: &str) {
        self.emit(HookKind::MethodExited, class_name, |event| {
            with_method_fields(event, class_name, method_name, descriptor).build()
        });
    }

    pub fn on_throwable_caught(
        &self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        throwable: &ThrowableInfo,
    ) {
        self.emit(HookKind::ThrowableCaught, class_name, |event| {
            with_method_fields(event, class_name, method_name, descriptor)
                .error(throwable.clone())
                .build()
        });
    }

    /// Whether a method should be instrumented at all. Uses the method-aware filter checks, so
    /// an empty blacklist rejects everything here.
    #[must_use]
    pub fn should_instrument(&self, class_name: &str, method_name: &str) -> bool {
        self.ctx
            .config()
            .filters
            .should_instrument(class_name, method_name)
    }

    fn emit<F>(&self, kind: HookKind, class_name: &str, build: F)
    where
        F: FnOnce(agent_transport::EventBuilder) -> Event,
    {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let config = self.ctx.config();
            if !kind.enabled(&config)
                || self.ctx.is_paused()
                || !config.filters.should_emit(class_name)
            {
                return Ok(());
            }
            let event = build(Event::builder(kind.event_type(), HOOK_SOURCE));
            self.ctx.publish_blocking(event)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Dropped {} event for {class_name}: {e}", kind.event_type()),
            Err(_) => error!(
                "Panic while recording {} event for {class_name}",
                kind.event_type()
            ),
        }
    }
}

fn with_method_fields(
    event: agent_transport::EventBuilder,
    class_name: &str,
    method_name: &str,
    descriptor: &str,
) -> agent_transport::EventBuilder {
    let thread = std::thread::current();
    event
        .field("className", class_name)
        .field("methodName", method_name)
        .field("methodDesc", descriptor)
        .field("threadID", THREAD_ID.with(|id| *id))
        .field("threadName", thread.name().unwrap_or("unnamed"))
}
