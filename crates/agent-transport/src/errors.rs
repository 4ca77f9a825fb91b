// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while selecting, starting or sending through a transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Unknown transport implementation: {0}")]
    UnknownTransport(String),

    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport not started")]
    NotStarted,

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TransportError::UnknownTransport("kafka".to_string());
        assert_eq!(
            error.to_string(),
            "Unknown transport implementation: kafka"
        );
    }

    #[test]
    fn test_connect_error_keeps_source() {
        let error = TransportError::Connect {
            addr: "localhost:5150".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(error.to_string().starts_with("Failed to connect to localhost:5150"));
        assert!(std::error::Error::source(&error).is_some());
    }
}
