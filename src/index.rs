//! Existing Data Index
//!
//! Nested lookup of what the events store already holds, built from the
//! grouped `max(eventTimestamp)` query. Depth `d` is keyed by values of
//! filter dimension `d`; the leaf at depth `k` is the latest published
//! timestamp (epoch milliseconds) for that exact combination.
//!
//! ```text
//! Region ─┬─ "eu" ─┬─ Service "api" → 1700000000000
//!         │        └─ Service "web" → 1700000060000
//!         └─ "us" ─── Service "api" → 1699999940000
//! ```
//!
//! A missing path means "never published", not "published at time zero".

use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::filters::FilterSpec;
use crate::source::SourceRow;

/// A node in the index tree
#[derive(Debug, Clone, PartialEq)]
pub enum IndexNode {
    /// Next dimension level
    Branch(HashMap<String, IndexNode>),
    /// Latest known timestamp in epoch milliseconds
    Leaf(i64),
}

/// Point-lookup index over previously published data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExistingDataIndex {
    depth: usize,
    root: HashMap<String, IndexNode>,
    entries: usize,
}

/// Comparable key for a dimension value.
///
/// Strings are used as-is and numbers/bools by their JSON text, so a
/// numeric column from the source matches the same value coming back from
/// the events store. Nulls and nested values have no key.
pub fn dimension_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn epoch_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

impl ExistingDataIndex {
    /// Build the index from remote result rows `[dim_1, …, dim_k, lastTimestampMs]`.
    ///
    /// Rows with a dimension value outside the declared filter values are
    /// dropped silently; so are malformed rows (too short, non-numeric leaf).
    pub fn build(rows: &[Vec<Value>], filters: &FilterSpec) -> Self {
        let mut index = Self {
            depth: filters.len(),
            ..Self::default()
        };

        if filters.is_empty() {
            return index;
        }

        for row in rows {
            let Some(path) = Self::declared_path(row, filters) else {
                continue;
            };
            let Some(timestamp) = row.get(filters.len()).and_then(epoch_millis) else {
                debug!("Dropping existing-data row without timestamp: {:?}", row);
                continue;
            };
            index.insert(&path, timestamp);
        }

        index
    }

    /// Dimension keys of `row` if every one is declared in its filter
    fn declared_path(row: &[Value], filters: &FilterSpec) -> Option<Vec<String>> {
        if row.len() < filters.len() + 1 {
            debug!("Dropping short existing-data row: {:?}", row);
            return None;
        }

        filters
            .iter()
            .zip(row)
            .map(|(filter, value)| dimension_key(value).filter(|key| filter.accepts(key)))
            .collect()
    }

    fn insert(&mut self, path: &[String], timestamp: i64) {
        let Some((last, prefix)) = path.split_last() else {
            return;
        };

        let mut level = &mut self.root;
        for key in prefix {
            let node = level
                .entry(key.clone())
                .or_insert_with(|| IndexNode::Branch(HashMap::new()));
            level = match node {
                IndexNode::Branch(children) => children,
                IndexNode::Leaf(_) => return,
            };
        }

        match level.get_mut(last) {
            Some(IndexNode::Leaf(existing)) => *existing = (*existing).max(timestamp),
            Some(IndexNode::Branch(_)) => {}
            None => {
                level.insert(last.clone(), IndexNode::Leaf(timestamp));
                self.entries += 1;
            }
        }
    }

    /// Latest timestamp recorded for an exact dimension path
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<i64> {
        if path.len() != self.depth || path.is_empty() {
            return None;
        }

        let mut level = &self.root;
        let (last, prefix) = path.split_last()?;
        for key in prefix {
            match level.get(key.as_ref())? {
                IndexNode::Branch(children) => level = children,
                IndexNode::Leaf(_) => return None,
            }
        }

        match level.get(last.as_ref())? {
            IndexNode::Leaf(timestamp) => Some(*timestamp),
            IndexNode::Branch(_) => None,
        }
    }

    /// Whether `row` has not been published yet.
    ///
    /// Walks the row's first `k` fields as the dimension path. Absent path
    /// means new; otherwise the row is new only when its timestamp is
    /// strictly later than the leaf. With no dimensions every row is new.
    pub fn is_new(&self, row: &SourceRow) -> bool {
        if self.depth == 0 {
            return true;
        }

        let path: Option<Vec<String>> = row
            .fields
            .iter()
            .take(self.depth)
            .map(dimension_key)
            .collect();
        let Some(path) = path.filter(|p| p.len() == self.depth) else {
            return true;
        };

        match self.lookup(&path) {
            None => true,
            Some(last_ms) => match Utc.timestamp_millis_opt(last_ms).single() {
                Some(last) => row.event_timestamp > last,
                None => true,
            },
        }
    }

    /// Number of leaves (distinct dimension combinations)
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}
