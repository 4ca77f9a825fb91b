// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use tracing::warn;

/// User-defined `key=value` tags appended to every event.
///
/// Parsed from a comma-separated list. Entries without `=` or with an empty key are skipped;
/// a repeated key keeps its first position and its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTags(Arc<[(String, String)]>);

impl UserTags {
    #[must_use]
    pub fn parse(list: &str) -> Self {
        let mut tags: Vec<(String, String)> = Vec::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((key, value)) = entry.split_once('=') else {
                warn!("Ignoring user event tag without '=': '{entry}'");
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                warn!("Ignoring user event tag with empty key: '{entry}'");
                continue;
            }
            let value = value.trim().to_string();
            match tags.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value,
                None => tags.push((key.to_string(), value)),
            }
        }
        UserTags(tags.into())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for UserTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}
