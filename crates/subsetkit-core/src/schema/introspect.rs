//! Schema Model construction (§4.1): drives a [`Driver`] to introspect the
//! requested schemas, merges in logical foreign keys from config, pulls in
//! any other schema a requested table's foreign keys reach across into
//! (§8 scenario 6), applies the include/exclude table selection rule,
//! computes each selected table's target row count, and flags
//! `--full-table` tables as prioritized.

use std::collections::HashSet;

use crate::config::SubsetConfig;
use crate::driver::Driver;
use crate::error::{Result, SubsetError};
use crate::patterns;
use crate::schema::types::{DatabaseSchema, DatabaseType, ForeignKey};

/// Determine the database type from a connection URL.
pub fn database_type_from_url(url: &str) -> Result<DatabaseType> {
    let scheme = url.split("://").next().unwrap_or("");
    match scheme {
        "postgres" | "postgresql" => Ok(DatabaseType::PostgreSQL),
        "mysql" | "mariadb" => Ok(DatabaseType::MySQL),
        "sqlite" | "file" => Ok(DatabaseType::SQLite),
        other => Err(SubsetError::UnsupportedDatabase {
            scheme: other.to_string(),
        }),
    }
}

/// Everything the CLI collects that shapes the schema model: which schemas
/// to introspect, table filters, prioritized tables, and the copy fraction.
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    pub schemas: Vec<String>,
    pub table_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub full_tables: Vec<String>,
    pub fraction: f64,
    pub logarithmic: bool,
    pub config: Option<SubsetConfig>,
}

/// Build the full Schema Model: introspect, merge logical FKs, select
/// tables, size targets. This is the single entry point §4.1 describes;
/// everything downstream (selector, propagator, coordinator) only ever
/// sees the resulting [`DatabaseSchema`].
pub async fn build_schema_model(driver: &dyn Driver, opts: &ModelOptions) -> Result<DatabaseSchema> {
    let mut schemas = opts.schemas.clone();
    if let Some(cfg) = &opts.config {
        schemas.extend(cfg.schemas.iter().cloned());
    }
    let requested_schemas: HashSet<String> = schemas.iter().cloned().collect();

    let mut schema = driver.introspect(&schemas).await?;

    if let Some(cfg) = &opts.config {
        merge_logical_constraints(&mut schema, cfg)?;
    }

    discover_cross_schema_dependencies(driver, &mut schema, &schemas).await?;

    let mut table_patterns = opts.table_patterns.clone();
    let mut exclude_patterns = opts.exclude_patterns.clone();
    if let Some(cfg) = &opts.config {
        table_patterns.extend(cfg.tables.iter().cloned());
        exclude_patterns.extend(cfg.exclude_tables.iter().cloned());
    }

    select_tables(&mut schema, &table_patterns, &exclude_patterns, &requested_schemas)?;
    apply_full_table_priority(&mut schema, &opts.full_tables)?;

    for table in schema.tables.values_mut() {
        if !table.selected {
            continue;
        }
        table.source_row_count = driver.row_count(table).await?;
        table.target_row_count =
            target_row_count(table.source_row_count, table.prioritized, opts.logarithmic, opts.fraction);
    }

    Ok(schema)
}

/// Target row count formula (§4.1): prioritized tables copy everything;
/// otherwise linear (`floor(n * f)`, minimum 1 when `n > 0`) or logarithmic
/// (`floor(10 ^ (log10(n) * f))`, with `n=0 -> 0` and `n=1 -> 1`).
pub fn target_row_count(source_count: i64, prioritized: bool, logarithmic: bool, fraction: f64) -> i64 {
    if prioritized {
        return source_count;
    }
    if source_count == 0 {
        return 0;
    }
    if logarithmic {
        if source_count == 1 {
            return 1;
        }
        let n = source_count as f64;
        return (10f64.powf(n.log10() * fraction)).floor() as i64;
    }
    ((source_count as f64 * fraction).floor() as i64).max(1)
}

/// A foreign key may reach into a schema the caller never asked to
/// introspect (§8 scenario 6: only `schema_a` selected, but `schema_a`'s
/// orders reference `schema_b`'s customers). Those tables still need to
/// exist in the model for the propagator's parent closure to find them,
/// so this walks newly-discovered foreign keys to a fixed point,
/// introspecting each missing schema exactly once and merging its tables
/// in. `select_tables` is responsible for leaving them unselected.
async fn discover_cross_schema_dependencies(
    driver: &dyn Driver,
    schema: &mut DatabaseSchema,
    already_requested: &[String],
) -> Result<()> {
    // Seed from the schemas actually present after the initial introspect
    // (which may include a dialect's implicit default, e.g. Postgres's
    // "public" when no `--schema` flag was given at all) rather than just
    // `already_requested`, so a same-schema foreign key is never mistaken
    // for a cross-schema one.
    let mut introspected_schemas: HashSet<String> = already_requested.iter().cloned().collect();
    introspected_schemas.extend(schema.tables.values().filter_map(|t| t.schema_name.clone()));

    loop {
        let missing: HashSet<String> = schema
            .tables
            .values()
            .flat_map(|t| t.foreign_keys.iter())
            .filter_map(|fk| fk.referred_schema.clone())
            .filter(|s| !introspected_schemas.contains(s))
            .collect();
        if missing.is_empty() {
            break;
        }

        for schema_name in &missing {
            let fetched = driver.introspect(std::slice::from_ref(schema_name)).await?;
            for (key, table) in fetched.tables {
                schema.tables.entry(key).or_insert(table);
            }
            schema.enums.extend(fetched.enums);
            introspected_schemas.insert(schema_name.clone());
        }
    }
    Ok(())
}

fn merge_logical_constraints(schema: &mut DatabaseSchema, cfg: &SubsetConfig) -> Result<()> {
    for (child_table, constraints) in &cfg.constraints {
        let child_key = schema
            .find_table(child_table)
            .map(|t| t.qualified_name())
            .ok_or_else(|| SubsetError::UnknownTable {
                table: child_table.clone(),
                context: "config constraints".to_string(),
            })?;

        for c in constraints {
            let fk = ForeignKey {
                name: None,
                source_columns: c.constrained_columns.clone(),
                referred_schema: c.referred_schema.clone(),
                referenced_table: c.referred_table.clone(),
                referenced_columns: c.referred_columns.clone(),
                on_delete: crate::schema::types::ForeignKeyAction::NoAction,
                on_update: crate::schema::types::ForeignKeyAction::NoAction,
                is_deferrable: false,
                is_logical: true,
            };

            // Resolve by (schema, name) when the constraint declares a
            // schema, not name alone — two schemas may share a table name
            // (§8 scenario 6), and a bare-name match here could validate
            // the PK of the wrong table entirely.
            let referenced = schema
                .resolve_fk_target(&fk)
                .ok_or_else(|| SubsetError::UnknownTable {
                    table: c.referred_table.clone(),
                    context: "config constraints (referred_table)".to_string(),
                })?;
            if referenced.primary_key.is_none() {
                return Err(SubsetError::ReferencedTableHasNoPrimaryKey {
                    table: c.referred_table.clone(),
                });
            }

            schema.tables.get_mut(&child_key).unwrap().foreign_keys.push(fk);
        }
    }
    Ok(())
}

/// Apply the include/exclude rule (§4.1): a table is selected if it matches
/// at least one `--table` pattern (or there are none) and matches no
/// `--exclude-table` pattern. Every pattern must match at least one table,
/// or it's a configuration error.
///
/// A table pulled in only by [`discover_cross_schema_dependencies`] (its
/// schema was never requested) defaults to unselected when no `--table`
/// pattern names it directly: it stays visible for FK traversal (§8
/// scenario 6) without being sampled by the main loop in its own right.
fn select_tables(
    schema: &mut DatabaseSchema,
    include: &[String],
    exclude: &[String],
    requested_schemas: &HashSet<String>,
) -> Result<()> {
    for pattern in include.iter().chain(exclude.iter()) {
        let hits = schema
            .tables
            .values()
            .any(|t| patterns::matches_any(std::slice::from_ref(pattern), &t.name, &t.qualified_name()));
        if !hits {
            return Err(SubsetError::PatternMatchedNothing {
                pattern: pattern.clone(),
            });
        }
    }

    for table in schema.tables.values_mut() {
        let in_requested_schema = requested_schemas.is_empty()
            || table.schema_name.as_deref().map_or(true, |s| requested_schemas.contains(s));
        let included = if include.is_empty() {
            in_requested_schema
        } else {
            patterns::matches_any(include, &table.name, &table.qualified_name())
        };
        let excluded = patterns::matches_any(exclude, &table.name, &table.qualified_name());
        table.selected = included && !excluded;
    }
    Ok(())
}

/// Flag `--full-table` tables as prioritized. Exclusion is authoritative
/// over prioritization (§9 open question a): a table named in both
/// `--full-table` and `--exclude-table` is a configuration error.
fn apply_full_table_priority(schema: &mut DatabaseSchema, full_tables: &[String]) -> Result<()> {
    for name in full_tables {
        let key = schema
            .find_table(name)
            .map(|t| t.qualified_name())
            .ok_or_else(|| SubsetError::UnknownTable {
                table: name.clone(),
                context: "--full-table".to_string(),
            })?;
        let table = schema.tables.get_mut(&key).unwrap();
        if !table.selected {
            return Err(SubsetError::PrioritizedAndExcluded { table: name.clone() });
        }
        table.prioritized = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_target_minimum_one() {
        assert_eq!(target_row_count(3, false, false, 0.1), 1);
        assert_eq!(target_row_count(0, false, false, 0.5), 0);
        assert_eq!(target_row_count(100, false, false, 0.2), 20);
    }

    #[test]
    fn logarithmic_target_edge_cases() {
        assert_eq!(target_row_count(0, false, true, 0.5), 0);
        assert_eq!(target_row_count(1, false, true, 0.5), 1);
        // n=1_000_000, f=0.5 -> 10^(6*0.5) = 1000
        assert_eq!(target_row_count(1_000_000, false, true, 0.5), 1000);
    }

    #[test]
    fn prioritized_target_equals_source() {
        assert_eq!(target_row_count(12345, true, false, 0.01), 12345);
    }
}
