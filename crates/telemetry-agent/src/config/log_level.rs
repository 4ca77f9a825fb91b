// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log level configuration for the telemetry agent.
//!
//! Set through `agent.loggingLevel` in the properties file or the `loggingLevel` runtime
//! attribute. Parsing is case-insensitive. Besides the five `tracing` levels, the names
//! `FATAL`, `ALL` and `OFF` are accepted so existing agent property files keep working.
//!
//! # Default
//!
//! When no level is configured the agent logs at **ERROR**.

use std::fmt;
use std::str::FromStr;

/// Agent log level controlling verbosity of logging output.
///
/// ```
/// use telemetry_agent::config::log_level::LogLevel;
/// use std::str::FromStr;
///
/// assert_eq!(LogLevel::from_str("debug").unwrap(), LogLevel::Debug);
/// assert_eq!(LogLevel::from_str("FATAL").unwrap(), LogLevel::Error);
/// assert_eq!(LogLevel::Warn.as_ref(), "WARN");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Logging disabled.
    Off,
    /// Designates very serious errors. This is the **default** log level.
    #[default]
    Error,
    /// Designates hazardous situations that may lead to errors.
    Warn,
    /// Designates useful information about normal operations.
    Info,
    /// Designates lower priority information useful for debugging.
    Debug,
    /// Designates very low priority, extremely verbose information.
    Trace,
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Off => "OFF",
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl LogLevel {
    /// The `EnvFilter` directive for this level.
    #[must_use]
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(LogLevel::Off),
            "error" | "fatal" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" | "all" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: off, error, warn, info, debug, trace",
            )),
        }
    }
}
