//! Tracing setup for the telemetry agent.
//!
//! Every line is prefixed with `TELEMETRY_AGENT` so agent output can be told apart from the
//! host application's own logs:
//!
//! ```text
//! TELEMETRY_AGENT | INFO | Agent started in Running state with tcp transport
//! TELEMETRY_AGENT | ERROR | metrics_poller{poller=tomcat}: Poll of tomcat.xml failed, reconnecting next cycle: Poll failed: connection refused
//! ```
//!
//! The level filter sits behind a reload layer so the `loggingLevel` attribute can change it
//! at runtime through [`LogLevelControl`].

use std::fmt;
use std::sync::Arc;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::config::log_level::LogLevel;

/// Log formatter that prefixes messages with `TELEMETRY_AGENT | LEVEL |`.
#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "TELEMETRY_AGENT | {} | ", metadata.level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Runtime access to the active level filter.
pub trait LogLevelControl: Send + Sync {
    fn set_level(&self, level: LogLevel) -> Result<(), String>;
}

impl<S> LogLevelControl for reload::Handle<EnvFilter, S>
where
    S: Subscriber + Send + Sync + 'static,
{
    fn set_level(&self, level: LogLevel) -> Result<(), String> {
        self.reload(filter_for(level)).map_err(|e| e.to_string())
    }
}

/// Noisy dependencies stay off regardless of the agent level.
#[must_use]
pub fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::new(format!("h2=off,hyper=off,{}", level.as_directive()))
}

/// Installs the global subscriber and returns the handle used to change the level later.
pub fn init(level: LogLevel) -> anyhow::Result<Arc<dyn LogLevelControl>> {
    let (filter, handle) = reload::Layer::<EnvFilter, Registry>::new(filter_for(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .event_format(Formatter),
        )
        .try_init()?;
    Ok(Arc::new(handle))
}
