// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured events delivered to the remote collector.
//!
//! An [`Event`] is built once through [`EventBuilder`] and is immutable afterwards,
//! except for [`Event::with_tags`], which consumes the event and appends process-wide
//! tags at enqueue time. Field order is preserved in every encoding.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or_else(|_| FieldValue::Str(value.to_string()), FieldValue::Int)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<u8> for FieldValue {
    fn from(value: u8) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Exception details attached to an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    #[serde(rename = "errorClass")]
    pub class_name: String,
    #[serde(rename = "errorMessage")]
    pub message: String,
    #[serde(rename = "stackTrace")]
    pub stack_trace: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    timestamp_ms: u64,
    event_type: String,
    source: String,
    fields: Vec<(String, FieldValue)>,
    error: Option<ErrorRecord>,
}

impl Event {
    #[must_use]
    pub fn builder(event_type: impl Into<String>, source: impl Into<String>) -> EventBuilder {
        EventBuilder {
            event: Event {
                timestamp_ms: now_ms(),
                event_type: event_type.into(),
                source: source.into(),
                fields: Vec::new(),
                error: None,
            },
        }
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    #[must_use]
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// Returns the first field with the given name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    #[must_use]
    pub fn error(&self) -> Option<&ErrorRecord> {
        self.error.as_ref()
    }

    /// Appends tags after the producer's own fields.
    #[must_use]
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Encodes the event as a single `key="value"` line without a trailing newline.
    ///
    /// ```text
    /// time=1700000000000 eventType="method_entered" source="telemetry_agent" className="com.app.Foo"
    /// ```
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut line = format!("time={}", self.timestamp_ms);
        push_pair(&mut line, "eventType", &self.event_type);
        push_pair(&mut line, "source", &self.source);
        for (key, value) in &self.fields {
            push_pair(&mut line, key, &value.to_string());
        }
        if let Some(error) = &self.error {
            push_pair(&mut line, "errorClass", &error.class_name);
            push_pair(&mut line, "errorMessage", &error.message);
            push_pair(&mut line, "stackTrace", &error.stack_trace);
        }
        line
    }
}

impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("time", &self.timestamp_ms)?;
        map.serialize_entry("eventType", &self.event_type)?;
        map.serialize_entry("source", &self.source)?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}

/// Append-only builder; the only way to construct an [`Event`].
#[derive(Debug)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.event.fields.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn error(mut self, error: ErrorRecord) -> Self {
        self.event.error = Some(error);
        self
    }

    #[must_use]
    pub fn build(self) -> Event {
        self.event
    }
}

fn push_pair(line: &mut String, key: &str, value: &str) {
    line.push(' ');
    line.push_str(key);
    line.push_str("=\"");
    for c in value.chars() {
        match c {
            '"' => line.push_str("\\\""),
            '\\' => line.push_str("\\\\"),
            '\n' => line.push_str("\\n"),
            '\r' => line.push_str("\\r"),
            _ => line.push(c),
        }
    }
    line.push('"');
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
