//! # Configuration File Parser
//!
//! Reads and parses the optional `--config=PATH` JSON file (§6). The file
//! supplies logical foreign keys the catalog doesn't know about, plus
//! table/schema include-exclude lists that are unioned with the CLI's own
//! `--table`/`--exclude-table`/`--schema` flags, since both express the same
//! include/exclude semantics and the spec does not call for one to shadow
//! the other.
//!
//! Example:
//!
//! ```json
//! {
//!   "constraints": {
//!     "orders": [
//!       { "referred_schema": null, "referred_table": "customers",
//!         "referred_columns": ["id"], "constrained_columns": ["customer_id"] }
//!     ]
//!   },
//!   "tables": ["orders", "customers"],
//!   "schemas": ["public"],
//!   "exclude-tables": ["audit_log"]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SubsetError};

/// Top-level `--config` file structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubsetConfig {
    /// Logical foreign keys, keyed by child table name (bare or
    /// `schema.table`-qualified).
    pub constraints: BTreeMap<String, Vec<LogicalConstraint>>,
    /// Additional include-only table patterns, unioned with `--table`.
    pub tables: Vec<String>,
    /// Additional schemas to introspect, unioned with `--schema`.
    pub schemas: Vec<String>,
    /// Additional exclude patterns, unioned with `--exclude-table`.
    #[serde(rename = "exclude-tables")]
    pub exclude_tables: Vec<String>,
}

/// A single user-declared logical foreign key: the same shape as a
/// catalog FK, just not discovered by introspection. `referred_columns`
/// and `constrained_columns` must be equal-length and non-empty.
#[derive(Debug, Clone, Deserialize)]
pub struct LogicalConstraint {
    pub referred_schema: Option<String>,
    pub referred_table: String,
    pub referred_columns: Vec<String>,
    pub constrained_columns: Vec<String>,
}

impl LogicalConstraint {
    fn validate(&self, child_table: &str) -> Result<()> {
        if self.referred_columns.is_empty() || self.constrained_columns.is_empty() {
            return Err(SubsetError::Config {
                message: format!(
                    "logical constraint on '{child_table}' -> '{}' has empty column list",
                    self.referred_table
                ),
            });
        }
        if self.referred_columns.len() != self.constrained_columns.len() {
            return Err(SubsetError::Config {
                message: format!(
                    "logical constraint on '{child_table}' -> '{}' has mismatched column counts ({} referred vs {} constrained)",
                    self.referred_table,
                    self.referred_columns.len(),
                    self.constrained_columns.len()
                ),
            });
        }
        Ok(())
    }
}

impl SubsetConfig {
    /// Read and parse a `--config` JSON file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SubsetError::Config {
            message: format!("failed to read config file {}: {e}", path.display()),
        })?;
        let config: SubsetConfig =
            serde_json::from_str(&text).map_err(|e| SubsetError::Config {
                message: format!("failed to parse config file {}: {e}", path.display()),
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (child_table, constraints) in &self.constraints {
            for constraint in constraints {
                constraint.validate(child_table)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let json = r#"{
            "constraints": {
                "orders": [
                    { "referred_schema": null, "referred_table": "customers",
                      "referred_columns": ["id"], "constrained_columns": ["customer_id"] }
                ]
            },
            "tables": ["orders", "customers"],
            "exclude-tables": ["audit_log"]
        }"#;
        let config: SubsetConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.tables, vec!["orders", "customers"]);
        assert_eq!(config.exclude_tables, vec!["audit_log"]);
        assert_eq!(config.constraints["orders"].len(), 1);
    }

    #[test]
    fn empty_config_defaults() {
        let config: SubsetConfig = serde_json::from_str("{}").unwrap();
        assert!(config.constraints.is_empty());
        assert!(config.tables.is_empty());
    }

    #[test]
    fn rejects_mismatched_column_counts() {
        let json = r#"{
            "constraints": {
                "orders": [
                    { "referred_schema": null, "referred_table": "customers",
                      "referred_columns": ["id", "region"], "constrained_columns": ["customer_id"] }
                ]
            }
        }"#;
        let config: SubsetConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }
}
