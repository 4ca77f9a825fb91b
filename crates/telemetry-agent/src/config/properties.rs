// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::error;

use crate::error::ConfigError;

/// Flat `key=value` document. Blank lines and lines starting with `#` or `!` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut entries = BTreeMap::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Malformed {
                    line: idx + 1,
                    content: line.to_string(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::Malformed {
                    line: idx + 1,
                    content: line.to_string(),
                });
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Properties { entries })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Only a case-insensitive `true` is true; anything else present is false.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map_or(default, |v| v.eq_ignore_ascii_case("true"))
    }

    /// Unparseable numbers are logged and replaced by the default.
    #[must_use]
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.get(key).filter(|v| !v.is_empty()) {
            None => default,
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|e| {
                error!("Invalid value for {key} '{raw}': {e}, using default {default}");
                default
            }),
        }
    }

    /// Every entry whose key starts with `<prefix>.`, keys unchanged.
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> HashMap<String, String> {
        let dotted = format!("{prefix}.");
        self.entries
            .iter()
            .filter(|(k, _)| k.starts_with(&dotted))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let props = Properties::parse(
            "# agent\n\n! legacy comment\nagent.app.name = shop \ntrace.whitelist=com.app.Foo:bar\n",
        )
        .expect("parse");
        assert_eq!(props.get("agent.app.name"), Some("shop"));
        assert_eq!(props.get("trace.whitelist"), Some("com.app.Foo:bar"));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let props = Properties::parse("agent.userEventTags=env=prod,team=core").expect("parse");
        assert_eq!(props.get("agent.userEventTags"), Some("env=prod,team=core"));
    }

    #[test]
    fn test_line_without_separator_is_malformed() {
        let err = Properties::parse("agent.app.name=x\ntrace.jmx\n").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_bool_and_number_parsing() {
        let props = Properties::parse("a=TRUE\nb=yes\nc=15\nd=soon").expect("parse");
        assert!(props.get_bool("a", false));
        assert!(!props.get_bool("b", true));
        assert!(props.get_bool("missing", true));
        assert_eq!(props.get_u64("c", 60), 15);
        assert_eq!(props.get_u64("d", 60), 60);
    }

    #[test]
    fn test_with_prefix_keeps_keys() {
        let props = Properties::parse(
            "collector.transport.impl=udp\ncollector.transport.udp.port=9000\ncollectorx=1\nagent.app.name=a",
        )
        .expect("parse");
        let forwarded = props.with_prefix("collector");
        assert_eq!(forwarded.len(), 2);
        assert_eq!(
            forwarded.get("collector.transport.udp.port").map(String::as_str),
            Some("9000")
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = Properties::load(Path::new("/nonexistent/agent.properties")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
