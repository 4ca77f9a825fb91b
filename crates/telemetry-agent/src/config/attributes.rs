// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named runtime attributes shared by the in-process control API and the admin endpoint.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::log_level::LogLevel;
use crate::config::record_types::RecordTypeFilter;
use crate::config::user_tags::UserTags;
use crate::config::{split_names, AgentConfig, PollerTarget};
use crate::error::ControlError;
use crate::filter::RuleSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    AppName,
    AppInstance,
    UserEventTags,
    LoggingLevel,
    TracingWhitelist,
    TracingBlacklist,
    TraceMethodEntered,
    TraceMethodExited,
    TraceClassLoaded,
    TraceErrors,
    TraceJmx,
    TraceJmxConfigFiles,
    TraceJmxFrequency,
    TraceHProf,
    TraceHProfTempFile,
    TraceHProfFrequency,
    TraceHProfRecordTypes,
    StartPaused,
}

/// Which running components must be refreshed after an attribute changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Logging,
    Pollers,
    Sampler,
}

impl Attribute {
    pub const ALL: [Attribute; 18] = [
        Attribute::AppName,
        Attribute::AppInstance,
        Attribute::UserEventTags,
        Attribute::LoggingLevel,
        Attribute::TracingWhitelist,
        Attribute::TracingBlacklist,
        Attribute::TraceMethodEntered,
        Attribute::TraceMethodExited,
        Attribute::TraceClassLoaded,
        Attribute::TraceErrors,
        Attribute::TraceJmx,
        Attribute::TraceJmxConfigFiles,
        Attribute::TraceJmxFrequency,
        Attribute::TraceHProf,
        Attribute::TraceHProfTempFile,
        Attribute::TraceHProfFrequency,
        Attribute::TraceHProfRecordTypes,
        Attribute::StartPaused,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Attribute::AppName => "appName",
            Attribute::AppInstance => "appInstance",
            Attribute::UserEventTags => "userEventTags",
            Attribute::LoggingLevel => "loggingLevel",
            Attribute::TracingWhitelist => "tracingWhitelist",
            Attribute::TracingBlacklist => "tracingBlacklist",
            Attribute::TraceMethodEntered => "traceMethodEntered",
            Attribute::TraceMethodExited => "traceMethodExited",
            Attribute::TraceClassLoaded => "traceClassLoaded",
            Attribute::TraceErrors => "traceErrors",
            Attribute::TraceJmx => "traceJMX",
            Attribute::TraceJmxConfigFiles => "traceJMXConfigFiles",
            Attribute::TraceJmxFrequency => "traceJMXFrequency",
            Attribute::TraceHProf => "traceHProf",
            Attribute::TraceHProfTempFile => "traceHProfTempFile",
            Attribute::TraceHProfFrequency => "traceHProfFrequency",
            Attribute::TraceHProfRecordTypes => "traceHProfRecordTypes",
            Attribute::StartPaused => "startPaused",
        }
    }

    #[must_use]
    pub fn effect(self) -> Effect {
        match self {
            Attribute::LoggingLevel => Effect::Logging,
            Attribute::TraceJmx | Attribute::TraceJmxConfigFiles | Attribute::TraceJmxFrequency => {
                Effect::Pollers
            }
            Attribute::TraceHProf | Attribute::TraceHProfTempFile | Attribute::TraceHProfFrequency => {
                Effect::Sampler
            }
            _ => Effect::None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Attribute {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attribute::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ControlError::UnknownAttribute(s.to_string()))
    }
}

impl AgentConfig {
    /// Current value of an attribute, formatted the way the setter accepts it.
    #[must_use]
    pub fn attribute(&self, attribute: Attribute) -> String {
        match attribute {
            Attribute::AppName => self.app_name.clone(),
            Attribute::AppInstance => self.app_instance.clone(),
            Attribute::UserEventTags => self.user_tags.to_string(),
            Attribute::LoggingLevel => self.logging_level.to_string(),
            Attribute::TracingWhitelist => self.filters.whitelist.to_string(),
            Attribute::TracingBlacklist => self.filters.blacklist.to_string(),
            Attribute::TraceMethodEntered => self.trace_method_entered.to_string(),
            Attribute::TraceMethodExited => self.trace_method_exited.to_string(),
            Attribute::TraceClassLoaded => self.trace_class_loaded.to_string(),
            Attribute::TraceErrors => self.trace_errors.to_string(),
            Attribute::TraceJmx => self.trace_jmx.to_string(),
            Attribute::TraceJmxConfigFiles => self
                .jmx_targets
                .iter()
                .map(|t| t.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
            Attribute::TraceJmxFrequency => self.jmx_default_frequency_secs.to_string(),
            Attribute::TraceHProf => self.trace_hprof.to_string(),
            Attribute::TraceHProfTempFile => self.hprof_file.display().to_string(),
            Attribute::TraceHProfFrequency => self.hprof_frequency_secs.to_string(),
            Attribute::TraceHProfRecordTypes => self.hprof_record_types.to_string(),
            Attribute::StartPaused => self.start_paused.to_string(),
        }
    }

    /// Returns a copy of this snapshot with one attribute replaced. Invalid values leave
    /// `self` untouched and return an error.
    pub fn with_attribute(&self, attribute: Attribute, value: &str) -> Result<Self, ControlError> {
        let invalid = |reason: String| ControlError::InvalidValue {
            attribute: attribute.name().to_string(),
            reason,
        };
        let mut next = self.clone();
        match attribute {
            Attribute::AppName => next.app_name = value.to_string(),
            Attribute::AppInstance => next.app_instance = value.to_string(),
            Attribute::UserEventTags => next.user_tags = UserTags::parse(value),
            Attribute::LoggingLevel => next.logging_level = LogLevel::from_str(value).map_err(invalid)?,
            Attribute::TracingWhitelist => {
                next.filters.whitelist = RuleSet::parse(value).map_err(|e| invalid(e.to_string()))?;
            }
            Attribute::TracingBlacklist => {
                next.filters.blacklist = RuleSet::parse(value).map_err(|e| invalid(e.to_string()))?;
            }
            Attribute::TraceMethodEntered => next.trace_method_entered = parse_bool(value).map_err(invalid)?,
            Attribute::TraceMethodExited => next.trace_method_exited = parse_bool(value).map_err(invalid)?,
            Attribute::TraceClassLoaded => next.trace_class_loaded = parse_bool(value).map_err(invalid)?,
            Attribute::TraceErrors => next.trace_errors = parse_bool(value).map_err(invalid)?,
            Attribute::TraceJmx => next.trace_jmx = parse_bool(value).map_err(invalid)?,
            Attribute::TraceJmxConfigFiles => {
                next.jmx_targets = split_names(value)
                    .map(|name| PollerTarget {
                        name: name.to_string(),
                        frequency_secs: self
                            .jmx_targets
                            .iter()
                            .find(|t| t.name == name)
                            .and_then(|t| t.frequency_secs),
                    })
                    .collect();
            }
            Attribute::TraceJmxFrequency => next.jmx_default_frequency_secs = parse_secs(value).map_err(invalid)?,
            Attribute::TraceHProf => next.trace_hprof = parse_bool(value).map_err(invalid)?,
            Attribute::TraceHProfTempFile => {
                if value.trim().is_empty() {
                    return Err(invalid("path must not be empty".to_string()));
                }
                next.hprof_file = PathBuf::from(value.trim());
            }
            Attribute::TraceHProfFrequency => next.hprof_frequency_secs = parse_secs(value).map_err(invalid)?,
            Attribute::TraceHProfRecordTypes => {
                next.hprof_record_types = RecordTypeFilter::parse(value).map_err(invalid)?;
            }
            Attribute::StartPaused => next.start_paused = parse_bool(value).map_err(invalid)?,
        }
        Ok(next)
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true or false, got '{other}'")),
    }
}

fn parse_secs(value: &str) -> Result<u64, String> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err("interval must be greater than zero".to_string()),
        Ok(secs) => Ok(secs),
        Err(e) => Err(format!("'{value}': {e}")),
    }
}
