//! Presence Index (§4.2). Per table, the set of primary-key tuples already
//! copied into the target, answering "do we already have this row" in O(1)
//! and backing the completeness score.

use std::collections::{HashMap, HashSet};

use crate::value::Value;

/// Membership set over PK tuples for a single table, plus a counter for
/// PK-less tables where membership is always false (§4.2).
#[derive(Debug, Default)]
struct TableEntries {
    keys: HashSet<Vec<Value>>,
    pk_less_count: i64,
}

/// Tracks which rows have already been copied into the target, keyed by
/// table name. Entries are monotonically added; nothing is ever evicted
/// (§3 Lifecycles).
#[derive(Debug, Default)]
pub struct PresenceIndex {
    tables: HashMap<String, TableEntries>,
}

impl PresenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if this PK tuple has already been copied. Always false for
    /// PK-less tables (nothing to key on).
    pub fn contains(&self, table: &str, key: &[Value]) -> bool {
        self.tables
            .get(table)
            .map(|e| e.keys.contains(key))
            .unwrap_or(false)
    }

    /// Record a PK tuple as copied. Idempotent.
    pub fn add(&mut self, table: &str, key: Vec<Value>) {
        self.tables.entry(table.to_string()).or_default().keys.insert(key);
    }

    /// Record a copy into a PK-less table, where membership can't be
    /// tracked by key and `count()` relies on this counter instead.
    pub fn add_pk_less(&mut self, table: &str) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .pk_less_count += 1;
    }

    /// Rows copied so far for this table, used for the completeness score.
    pub fn count(&self, table: &str) -> i64 {
        self.tables
            .get(table)
            .map(|e| e.keys.len() as i64 + e.pk_less_count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_false_until_added() {
        let mut idx = PresenceIndex::new();
        let key = vec![Value::Int(1)];
        assert!(!idx.contains("users", &key));
        idx.add("users", key.clone());
        assert!(idx.contains("users", &key));
    }

    #[test]
    fn add_is_idempotent_for_count() {
        let mut idx = PresenceIndex::new();
        idx.add("users", vec![Value::Int(1)]);
        idx.add("users", vec![Value::Int(1)]);
        assert_eq!(idx.count("users"), 1);
    }

    #[test]
    fn pk_less_tables_never_contain_anything() {
        let mut idx = PresenceIndex::new();
        idx.add_pk_less("logs");
        idx.add_pk_less("logs");
        assert!(!idx.contains("logs", &[]));
        assert_eq!(idx.count("logs"), 2);
    }

    #[test]
    fn unknown_table_counts_zero() {
        let idx = PresenceIndex::new();
        assert_eq!(idx.count("nope"), 0);
    }
}
