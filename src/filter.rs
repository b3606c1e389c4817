//! Subscription filters sent in `REQ` and `COUNT` messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Declarative predicate over events. A missing field is unconstrained.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    /// Restrict to specific event ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    /// Restrict to specific authors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    /// Restrict to event kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    /// Inclusive lower bound for `created_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Inclusive upper bound for `created_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    /// Cap on the number of events the relay should return. A hint only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Single-letter tag filters keyed by their `#` prefix (e.g. `#e`, `#p`).
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn authors<S: Into<String>>(mut self, authors: impl IntoIterator<Item = S>) -> Self {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn since(mut self, ts: u64) -> Self {
        self.since = Some(ts);
        self
    }

    pub fn until(mut self, ts: u64) -> Self {
        self.until = Some(ts);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add a tag filter; the key is stored with its `#` prefix.
    pub fn tag<S: Into<String>>(mut self, name: &str, values: impl IntoIterator<Item = S>) -> Self {
        let key = if name.starts_with('#') {
            name.to_string()
        } else {
            format!("#{name}")
        };
        self.tags
            .insert(key, values.into_iter().map(Into::into).collect());
        self
    }

    /// Check an event against this filter. `limit` is not evaluated here.
    pub fn matches(&self, ev: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|i| i == &ev.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| a == &ev.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&ev.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if ev.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if ev.created_at > until {
                return false;
            }
        }
        for (key, values) in &self.tags {
            let name = key.trim_start_matches('#');
            if !ev.tag_values(name).any(|v| values.iter().any(|w| w == v)) {
                return false;
            }
        }
        true
    }
}
