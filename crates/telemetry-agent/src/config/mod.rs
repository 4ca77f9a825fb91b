// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! [`AgentConfig`] is an immutable snapshot built from a flat [`Properties`] document. The
//! agent never edits a published snapshot: runtime setters and file reloads build a new one
//! and swap it in, so readers always see a complete configuration.
//!
//! Recognized keys (defaults in parentheses):
//!
//! | key | meaning |
//! |---|---|
//! | `agent.app.name` / `agent.app.instance` | `appName` / `appID` on every event (`""`) |
//! | `agent.startPaused` | begin paused (`false`) |
//! | `agent.userEventTags` | comma-separated `key=value` tags |
//! | `agent.loggingLevel` | `ERROR` |
//! | `agent.admin.port` | enables the HTTP control plane on 127.0.0.1 |
//! | `agent.configWatch.intervalSecs` | config file poll interval (5) |
//! | `trace.classLoaded`, `trace.methodEntered`, `trace.methodExited`, `trace.errors` | (`true`) |
//! | `trace.whitelist` / `trace.blacklist` | comma-separated `class[:method]` |
//! | `trace.jmx`, `trace.jmx.configfiles` | metrics pollers (`false`, none) |
//! | `trace.jmx.<name>.frequency`, `trace.jmx.default.frequency` | seconds (60) |
//! | `trace.hprof`, `trace.hprof.tempfile`, `trace.hprof.frequency` | snapshot sampler (`false`, temp dir, 600) |
//! | `trace.hprof.recordtypes` | comma-separated `type[:subtype]` |
//! | `collector.*` | forwarded verbatim to the transport |
//! | `collector.transport.impl` | transport name (`tcp`) |
//! | `collector.transport.internalQueueSize` | queue capacity (100000) |
//! | `collector.transport.queueFullPolicy` | `block` or `drop` (`block`) |

pub mod attributes;
pub mod log_level;
pub mod properties;
pub mod record_types;
pub mod user_tags;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use agent_transport::TRANSPORT_PREFIX;
use tracing::error;

use crate::error::ConfigError;
use crate::filter::{Filters, RuleSet};
pub use attributes::Attribute;
use log_level::LogLevel;
pub use properties::Properties;
use record_types::RecordTypeFilter;
use user_tags::UserTags;

pub const DEFAULT_TRANSPORT: &str = "tcp";
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;
pub const DEFAULT_JMX_FREQUENCY_SECS: u64 = 60;
pub const DEFAULT_HPROF_FREQUENCY_SECS: u64 = 600;
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 5;
const DEFAULT_HPROF_FILE_NAME: &str = "telemetry-agent.hprof";

/// What producers do when the event queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFullPolicy {
    /// Wait for space, or for the queue to be shut down.
    #[default]
    Block,
    /// Drop the event immediately.
    Drop,
}

impl FromStr for QueueFullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(QueueFullPolicy::Block),
            "drop" => Ok(QueueFullPolicy::Drop),
            _ => Err(format!("Invalid queue full policy: '{s}'. Valid values are: block, drop")),
        }
    }
}

impl fmt::Display for QueueFullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueFullPolicy::Block => f.write_str("block"),
            QueueFullPolicy::Drop => f.write_str("drop"),
        }
    }
}

/// A named metrics target; its document is `<name>.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerTarget {
    pub name: String,
    /// Per-target interval; `None` follows `trace.jmx.default.frequency`.
    pub frequency_secs: Option<u64>,
}

impl PollerTarget {
    #[must_use]
    pub fn config_file(&self) -> String {
        format!("{}.xml", self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    generation: u64,

    pub app_name: String,
    pub app_instance: String,
    pub start_paused: bool,
    pub user_tags: UserTags,
    pub logging_level: LogLevel,

    pub trace_class_loaded: bool,
    pub trace_method_entered: bool,
    pub trace_method_exited: bool,
    pub trace_errors: bool,
    pub filters: Filters,

    pub trace_jmx: bool,
    pub jmx_targets: Vec<PollerTarget>,
    pub jmx_default_frequency_secs: u64,

    pub trace_hprof: bool,
    pub hprof_file: PathBuf,
    pub hprof_frequency_secs: u64,
    pub hprof_record_types: RecordTypeFilter,

    pub transport_impl: String,
    pub transport_config: HashMap<String, String>,
    pub queue_capacity: usize,
    pub queue_full_policy: QueueFullPolicy,

    pub admin_port: Option<u16>,
    pub watch_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_properties(&Properties::default(), None)
    }
}

impl AgentConfig {
    /// Reads and parses a properties file. I/O and syntax errors are returned; individual bad
    /// values are logged and replaced (see [`Self::from_properties`]).
    pub fn from_file(path: &Path, previous: Option<&AgentConfig>) -> Result<Self, ConfigError> {
        let props = Properties::load(path)?;
        Ok(Self::from_properties(&props, previous))
    }

    /// Builds a snapshot from properties. An invalid filter or record-type list keeps the
    /// corresponding list from `previous` (or an empty one at startup); other invalid values
    /// fall back to their defaults.
    #[must_use]
    pub fn from_properties(props: &Properties, previous: Option<&AgentConfig>) -> Self {
        let whitelist = parse_rules(props, "trace.whitelist", previous.map(|p| &p.filters.whitelist));
        let blacklist = parse_rules(props, "trace.blacklist", previous.map(|p| &p.filters.blacklist));

        let hprof_record_types = match RecordTypeFilter::parse(props.get_or("trace.hprof.recordtypes", "")) {
            Ok(filter) => filter,
            Err(e) => {
                error!("Invalid trace.hprof.recordtypes, keeping previous filter: {e}");
                previous.map(|p| p.hprof_record_types.clone()).unwrap_or_default()
            }
        };

        let logging_level = props
            .get("agent.loggingLevel")
            .map_or(Ok(LogLevel::default()), LogLevel::from_str)
            .unwrap_or_else(|e| {
                error!("{e}");
                LogLevel::default()
            });

        let queue_full_policy = props
            .get(&format!("{TRANSPORT_PREFIX}.transport.queueFullPolicy"))
            .map_or(Ok(QueueFullPolicy::default()), QueueFullPolicy::from_str)
            .unwrap_or_else(|e| {
                error!("{e}");
                QueueFullPolicy::default()
            });

        let queue_key = format!("{TRANSPORT_PREFIX}.transport.internalQueueSize");
        let queue_capacity = usize::try_from(props.get_u64(&queue_key, DEFAULT_QUEUE_CAPACITY as u64))
            .ok()
            .filter(|n| (1..=tokio::sync::Semaphore::MAX_PERMITS).contains(n))
            .unwrap_or_else(|| {
                error!("{queue_key} out of range, using {DEFAULT_QUEUE_CAPACITY}");
                DEFAULT_QUEUE_CAPACITY
            });

        let jmx_default_frequency_secs =
            positive_secs(props, "trace.jmx.default.frequency", DEFAULT_JMX_FREQUENCY_SECS);
        let jmx_targets = split_names(props.get_or("trace.jmx.configfiles", ""))
            .map(|name| {
                let key = format!("trace.jmx.{name}.frequency");
                let frequency_secs = props
                    .get(&key)
                    .map(|_| positive_secs(props, &key, jmx_default_frequency_secs));
                PollerTarget {
                    name: name.to_string(),
                    frequency_secs,
                }
            })
            .collect();

        let hprof_file = props
            .get("trace.hprof.tempfile")
            .filter(|v| !v.is_empty())
            .map_or_else(|| std::env::temp_dir().join(DEFAULT_HPROF_FILE_NAME), PathBuf::from);

        let admin_port = props.get("agent.admin.port").filter(|v| !v.is_empty()).and_then(|raw| {
            raw.parse::<u16>()
                .map_err(|e| error!("Invalid agent.admin.port '{raw}': {e}"))
                .ok()
        });

        AgentConfig {
            generation: previous.map_or(0, |p| p.generation),
            app_name: props.get_or("agent.app.name", "").to_string(),
            app_instance: props.get_or("agent.app.instance", "").to_string(),
            start_paused: props.get_bool("agent.startPaused", false),
            user_tags: UserTags::parse(props.get_or("agent.userEventTags", "")),
            logging_level,
            trace_class_loaded: props.get_bool("trace.classLoaded", true),
            trace_method_entered: props.get_bool("trace.methodEntered", true),
            trace_method_exited: props.get_bool("trace.methodExited", true),
            trace_errors: props.get_bool("trace.errors", true),
            filters: Filters::new(whitelist, blacklist),
            trace_jmx: props.get_bool("trace.jmx", false),
            jmx_targets,
            jmx_default_frequency_secs,
            trace_hprof: props.get_bool("trace.hprof", false),
            hprof_file,
            hprof_frequency_secs: positive_secs(props, "trace.hprof.frequency", DEFAULT_HPROF_FREQUENCY_SECS),
            hprof_record_types,
            transport_impl: props
                .get(&format!("{TRANSPORT_PREFIX}.transport.impl"))
                .filter(|v| !v.is_empty())
                .unwrap_or(DEFAULT_TRANSPORT)
                .to_string(),
            transport_config: props.with_prefix(TRANSPORT_PREFIX),
            queue_capacity,
            queue_full_policy,
            admin_port,
            watch_interval_secs: positive_secs(
                props,
                "agent.configWatch.intervalSecs",
                DEFAULT_WATCH_INTERVAL_SECS,
            ),
        }
    }

    /// Monotonic id assigned when the snapshot is published.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    #[must_use]
    pub fn target_frequency_secs(&self, target: &PollerTarget) -> u64 {
        target.frequency_secs.unwrap_or(self.jmx_default_frequency_secs)
    }
}

fn parse_rules(props: &Properties, key: &str, previous: Option<&RuleSet>) -> RuleSet {
    match RuleSet::parse(props.get_or(key, "")) {
        Ok(rules) => rules,
        Err(e) => {
            error!("Invalid {key}, keeping previous rules: {e}");
            previous.cloned().unwrap_or_default()
        }
    }
}

/// Intervals must be non-zero.
fn positive_secs(props: &Properties, key: &str, default: u64) -> u64 {
    match props.get_u64(key, default) {
        0 => {
            error!("{key} must be greater than zero, using {default}");
            default
        }
        secs => secs,
    }
}

pub(crate) fn split_names(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|n| !n.is_empty())
}
