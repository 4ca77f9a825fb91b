// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use agent_transport::TransportError;

/// A malformed `class[:method]` filter entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterParseError {
    #[error("Filter entry has an empty class part: '{0}'")]
    EmptyClass(String),

    #[error("Filter entry has more than one ':' separator: '{0}'")]
    TooManySegments(String),

    #[error("Filter entry contains whitespace: '{0}'")]
    Whitespace(String),
}

/// Errors reading or interpreting the agent configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration at line {line}: '{content}'")]
    Malformed { line: usize, content: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Why an event did not make it into the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("Event queue is full")]
    Full,

    #[error("Event queue was shut down")]
    Cancelled,
}

/// Failures reported by external collaborators (management client, snapshot parser, target loader)
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to load target document {name}: {reason}")]
    TargetLoad { name: String, reason: String },

    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Poll failed: {0}")]
    Poll(String),

    #[error("Snapshot capture failed: {0}")]
    Capture(String),

    #[error("Snapshot parse failed: {0}")]
    Parse(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle errors surfaced by the controller
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Agent has been stopped")]
    Stopped,

    #[error("Agent was started without a configuration file")]
    NoConfigFile,

    #[error("Failed to bind admin endpoint: {0}")]
    AdminBind(std::io::Error),
}

/// Errors from the runtime control surface
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Invalid value for {attribute}: {reason}")]
    InvalidValue { attribute: String, reason: String },

    #[error(transparent)]
    Agent(#[from] AgentError),
}
