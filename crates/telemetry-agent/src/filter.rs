// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Whitelist/blacklist gate for instrumentation events.
//!
//! Rules are `class[:method]` entries. A class matches a rule when its name starts with the
//! rule's prefix, so `com.app.` also matches `com.app.internal.Foo` and `com.app` matches
//! `com.apple.Bar`. Rule sets are replaced as a whole, never edited in place.
//!
//! The class-only and class+method blacklist checks disagree on an empty list: the first denies
//! nothing, the second denies everything. Callers that depend on the method-aware variant must
//! account for that.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::FilterParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    class_prefix: String,
    method: Option<String>,
}

impl FilterRule {
    #[must_use]
    pub fn new(class_prefix: impl Into<String>, method: Option<String>) -> Self {
        FilterRule {
            class_prefix: class_prefix.into(),
            method,
        }
    }

    #[must_use]
    pub fn class_prefix(&self) -> &str {
        &self.class_prefix
    }

    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    #[must_use]
    pub fn matches_class(&self, class_name: &str) -> bool {
        class_name.starts_with(&self.class_prefix)
    }

    /// Method-agnostic rules match any method of a matching class.
    #[must_use]
    pub fn matches(&self, class_name: &str, method_name: &str) -> bool {
        self.matches_class(class_name) && self.method.as_deref().map_or(true, |m| m == method_name)
    }
}

impl FromStr for FilterRule {
    type Err = FilterParseError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let entry = entry.trim();
        if entry.chars().any(char::is_whitespace) {
            return Err(FilterParseError::Whitespace(entry.to_string()));
        }
        let mut parts = entry.split(':');
        let class_prefix = parts.next().unwrap_or_default();
        let method = parts.next();
        if parts.next().is_some() {
            return Err(FilterParseError::TooManySegments(entry.to_string()));
        }
        if class_prefix.is_empty() {
            return Err(FilterParseError::EmptyClass(entry.to_string()));
        }
        Ok(FilterRule {
            class_prefix: class_prefix.to_string(),
            method: method.filter(|m| !m.is_empty()).map(str::to_string),
        })
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{}:{}", self.class_prefix, method),
            None => f.write_str(&self.class_prefix),
        }
    }
}

/// An immutable, cheaply clonable list of rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet(Arc<[FilterRule]>);

impl RuleSet {
    /// Parses a comma-separated list. Empty entries are skipped; any malformed entry rejects
    /// the whole list.
    pub fn parse(list: &str) -> Result<Self, FilterParseError> {
        let rules = list
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(FilterRule::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RuleSet(rules.into()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn rules(&self) -> &[FilterRule] {
        &self.0
    }

    fn any_class(&self, class_name: &str) -> bool {
        self.0.iter().any(|rule| rule.matches_class(class_name))
    }

    fn any_method(&self, class_name: &str, method_name: &str) -> bool {
        self.0.iter().any(|rule| rule.matches(class_name, method_name))
    }
}

impl From<Vec<FilterRule>> for RuleSet {
    fn from(rules: Vec<FilterRule>) -> Self {
        RuleSet(rules.into())
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rule}")?;
        }
        Ok(())
    }
}

/// The pair of rule sets held by a configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    pub whitelist: RuleSet,
    pub blacklist: RuleSet,
}

impl Filters {
    #[must_use]
    pub fn new(whitelist: RuleSet, blacklist: RuleSet) -> Self {
        Filters {
            whitelist,
            blacklist,
        }
    }

    /// An empty whitelist allows every class.
    #[must_use]
    pub fn whitelist_allows(&self, class_name: &str) -> bool {
        self.whitelist.is_empty() || self.whitelist.any_class(class_name)
    }

    #[must_use]
    pub fn whitelist_allows_method(&self, class_name: &str, method_name: &str) -> bool {
        self.whitelist.is_empty() || self.whitelist.any_method(class_name, method_name)
    }

    /// An empty blacklist denies nothing.
    #[must_use]
    pub fn blacklist_denies(&self, class_name: &str) -> bool {
        !self.blacklist.is_empty() && self.blacklist.any_class(class_name)
    }

    /// An empty blacklist denies every class and method here, unlike [`Self::blacklist_denies`].
    #[must_use]
    pub fn blacklist_denies_method(&self, class_name: &str, method_name: &str) -> bool {
        self.blacklist.is_empty() || self.blacklist.any_method(class_name, method_name)
    }

    /// Gate applied to every hook event.
    #[must_use]
    pub fn should_emit(&self, class_name: &str) -> bool {
        self.whitelist_allows(class_name) && !self.blacklist_denies(class_name)
    }

    /// Method-aware gate for the instrumentation side. Inherits the empty-blacklist behaviour
    /// of [`Self::blacklist_denies_method`].
    #[must_use]
    pub fn should_instrument(&self, class_name: &str, method_name: &str) -> bool {
        self.whitelist_allows_method(class_name, method_name)
            && !self.blacklist_denies_method(class_name, method_name)
    }
}
