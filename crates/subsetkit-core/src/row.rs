//! A source/target row: an ordered column-name → value map (§9 "Dynamic
//! row dicts"), plus the primary-key-tuple helper the presence index and
//! propagator both need.

use indexmap::IndexMap;

use crate::value::Value;

pub type Row = IndexMap<String, Value>;

/// Extract a row's primary-key tuple in PK column order. Returns `None` if
/// any PK column is missing from the row (should not happen for a row read
/// back off the wire, but guards against a malformed fixture).
pub fn primary_key_tuple(row: &Row, pk_columns: &[String]) -> Option<Vec<Value>> {
    pk_columns
        .iter()
        .map(|c| row.get(c).cloned())
        .collect::<Option<Vec<_>>>()
}

/// Extract the tuple of values a foreign key constrains, in FK column order.
/// Returns `None` (meaning "this row doesn't constrain the FK, treat as
/// satisfied") if any constrained column is null, per the propagator's
/// parent-closure rule (§4.4 step 2).
pub fn foreign_key_tuple(row: &Row, fk_columns: &[String]) -> Option<Vec<Value>> {
    let mut out = Vec::with_capacity(fk_columns.len());
    for c in fk_columns {
        match row.get(c) {
            Some(v) if !v.is_null() => out.push(v.clone()),
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_tuple_missing_column_is_none() {
        let row: Row = IndexMap::new();
        assert_eq!(primary_key_tuple(&row, &["id".to_string()]), None);
    }

    #[test]
    fn foreign_key_tuple_null_column_is_none() {
        let mut row: Row = IndexMap::new();
        row.insert("parent_id".to_string(), Value::Null);
        assert_eq!(foreign_key_tuple(&row, &["parent_id".to_string()]), None);
    }

    #[test]
    fn foreign_key_tuple_present() {
        let mut row: Row = IndexMap::new();
        row.insert("parent_id".to_string(), Value::Int(7));
        assert_eq!(
            foreign_key_tuple(&row, &["parent_id".to_string()]),
            Some(vec![Value::Int(7)])
        );
    }
}
