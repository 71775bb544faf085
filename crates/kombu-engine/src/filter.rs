//! Metadata and time filters.
//!
//! Filters are evaluated before graph search against the metadata table the
//! passage store keeps in memory. The evaluated result is an explicit
//! allowed set; its size relative to `N` (the selectivity) decides whether
//! the searcher traverses the graph with a predicate or skips it entirely
//! and scores the allowed set brute-force.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use kombu_passage::PassageStore;
use kombu_vector::NodeId;
use serde_json::Value;
use std::collections::BTreeMap;

/// Declarative filter set supplied with a query.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    /// Metadata key must equal value (string, number, or bool).
    pub equals: BTreeMap<String, Value>,
    /// Inclusive lower bound on the `timestamp` metadata key.
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the `timestamp` metadata key.
    pub date_to: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.date_from.is_none() && self.date_to.is_none()
    }

    /// Whether one passage's metadata passes every clause.
    ///
    /// A date bound requires a parseable `timestamp` key; passages without
    /// one fail the clause.
    pub fn matches(&self, metadata: &serde_json::Map<String, Value>) -> bool {
        for (key, want) in &self.equals {
            if metadata.get(key) != Some(want) {
                return false;
            }
        }

        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(ts) = metadata
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
            else {
                return false;
            };
            if let Some(from) = self.date_from {
                if ts < from {
                    return false;
                }
            }
            if let Some(to) = self.date_to {
                if ts > to {
                    return false;
                }
            }
        }

        true
    }
}

/// The evaluated form of a filter: which nodes may appear in results.
#[derive(Debug)]
pub struct FilterSet {
    /// Allowed nodes, ascending. `None` means unfiltered.
    pub allowed: Option<Vec<NodeId>>,
    total: usize,
}

impl FilterSet {
    /// Evaluate `filters` over every passage's metadata.
    pub fn evaluate(filters: Option<&SearchFilters>, store: &PassageStore) -> Self {
        let total = store.len();
        let Some(filters) = filters.filter(|f| !f.is_empty()) else {
            return Self {
                allowed: None,
                total,
            };
        };

        let allowed: Vec<NodeId> = (0..total as NodeId)
            .filter(|&n| {
                store
                    .metadata_of(n)
                    .map(|m| filters.matches(m))
                    .unwrap_or(false)
            })
            .collect();

        tracing::debug!(allowed = allowed.len(), total, "filter evaluated");
        Self {
            allowed: Some(allowed),
            total,
        }
    }

    /// Fraction of nodes passing, in [0, 1]. Unfiltered counts as 1.
    pub fn selectivity(&self) -> f64 {
        match &self.allowed {
            None => 1.0,
            Some(list) if self.total == 0 => {
                debug_assert!(list.is_empty());
                0.0
            }
            Some(list) => list.len() as f64 / self.total as f64,
        }
    }

    /// Dense membership mask for predicate-guided traversal.
    pub fn mask(&self) -> Option<Vec<bool>> {
        self.allowed.as_ref().map(|list| {
            let mut mask = vec![false; self.total];
            for &n in list {
                mask[n as usize] = true;
            }
            mask
        })
    }
}

/// Parse an ISO-8601 timestamp: RFC 3339, a naive datetime, or a bare date
/// (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0).expect("midnight is valid").and_utc());
    }
    None
}
