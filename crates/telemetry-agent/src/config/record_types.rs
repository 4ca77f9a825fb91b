// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Allow-list of snapshot record types, parsed from `type[:subtype]` entries.
///
/// An empty filter allows every record. A type listed without any subtype allows all of its
/// subtypes, even when the same list also names some of its subtypes; otherwise the record's
/// subtype must be one of those listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordTypeFilter(Arc<BTreeMap<u8, Vec<u8>>>);

impl RecordTypeFilter {
    pub fn parse(list: &str) -> Result<Self, String> {
        let mut types: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        let mut bare = BTreeSet::new();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.split(':').map(str::trim);
            let record_type = parse_byte(parts.next().unwrap_or_default(), entry)?;
            let subtypes = types.entry(record_type).or_default();
            match parts.next() {
                Some(sub) => {
                    let sub = parse_byte(sub, entry)?;
                    if !subtypes.contains(&sub) {
                        subtypes.push(sub);
                    }
                }
                None => {
                    bare.insert(record_type);
                }
            }
            if parts.next().is_some() {
                return Err(format!("too many ':' separators in '{entry}'"));
            }
        }
        for record_type in &bare {
            if let Some(subtypes) = types.get_mut(record_type) {
                subtypes.clear();
            }
        }
        Ok(RecordTypeFilter(Arc::new(types)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn allows(&self, record_type: u8, sub_record_type: Option<u8>) -> bool {
        if self.0.is_empty() {
            return true;
        }
        match self.0.get(&record_type) {
            None => false,
            Some(subtypes) if subtypes.is_empty() => true,
            Some(subtypes) => sub_record_type.is_some_and(|sub| subtypes.contains(&sub)),
        }
    }
}

fn parse_byte(raw: &str, entry: &str) -> Result<u8, String> {
    raw.parse::<u8>()
        .map_err(|e| format!("invalid record type '{raw}' in '{entry}': {e}"))
}

impl fmt::Display for RecordTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (record_type, subtypes) in self.0.iter() {
            if subtypes.is_empty() {
                if !first {
                    f.write_str(",")?;
                }
                write!(f, "{record_type}")?;
                first = false;
            }
            for sub in subtypes {
                if !first {
                    f.write_str(",")?;
                }
                write!(f, "{record_type}:{sub}")?;
                first = false;
            }
        }
        Ok(())
    }
}
