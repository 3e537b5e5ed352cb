//! The Propagator (§4.4): the recursive core. Given a candidate row, it
//! closes over the row's parents (recursively, with child-budget 0 so a
//! parent fetch never itself triggers child expansion), inserts the row,
//! then bounded-expands into some of the row's children.
//!
//! Termination (§9) rests on three guarantees, all enforced here:
//! (i) the presence-index dedup check at entry is unconditional; (ii)
//! parent fetches always pass child-budget 0; (iii) child expansion always
//! decrements a global depth budget. Removing any one admits infinite
//! recursion on a cyclic reference graph.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::driver::Driver;
use crate::error::Result;
use crate::event::{EventBus, RowAdded};
use crate::presence::PresenceIndex;
use crate::row::{foreign_key_tuple, primary_key_tuple, Row};
use crate::schema::types::DatabaseSchema;

/// Mutable state threaded through every recursive call: the presence
/// index and one insertion buffer per target table. Owned exclusively by
/// the coordinator (§5 "Shared resources").
pub struct CopyState {
    pub presence: PresenceIndex,
    pub buffers: HashMap<String, Vec<Row>>,
    /// Rows actually inserted this run, for the CLI's final summary.
    pub inserted: HashMap<String, i64>,
}

impl CopyState {
    pub fn new() -> Self {
        Self {
            presence: PresenceIndex::new(),
            buffers: HashMap::new(),
            inserted: HashMap::new(),
        }
    }
}

impl Default for CopyState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Propagator<'a> {
    pub source: &'a dyn Driver,
    pub target: &'a dyn Driver,
    pub schema: &'a DatabaseSchema,
    /// `--children=N`: per-parent child fetch cap for non-priority rows.
    pub children_cap: i64,
    /// Buffered-insertion flush size (`--buffer=N`).
    pub flush_size: usize,
    pub events: &'a EventBus,
}

impl<'a> Propagator<'a> {
    /// Propagate a single candidate row from table `table_key` (the
    /// schema model's qualified-name key) into the target.
    pub fn propagate<'s>(
        &'s self,
        state: &'s mut CopyState,
        table_key: String,
        row: Row,
        priority: bool,
        child_budget: i64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 's>> {
        Box::pin(async move {
            let Some(table) = self.schema.tables.get(&table_key) else {
                return Ok(());
            };

            // Step 1: unconditional presence check.
            if let Some(pk) = &table.primary_key {
                if let Some(key) = primary_key_tuple(&row, &pk.columns) {
                    if state.presence.contains(&table_key, &key) {
                        return Ok(());
                    }
                }
            }

            // Step 2: parent closure.
            for fk in &table.foreign_keys {
                let Some(parent_table) = self.schema.resolve_fk_target(fk) else {
                    continue;
                };
                let parent_key = parent_table.qualified_name();
                // Unselected parents are never inserted into; traversal
                // through them is a no-op rather than an abandonment (the
                // user explicitly chose not to copy that table).
                if !parent_table.selected {
                    continue;
                }

                let Some(fk_tuple) = foreign_key_tuple(&row, &fk.source_columns) else {
                    continue;
                };

                let already_present = state.presence.contains(&parent_key, &fk_tuple);
                if !already_present {
                    match self.source.fetch_by_key(parent_table, &fk_tuple).await? {
                        Some(parent_row) => {
                            self.propagate(&mut *state, parent_key.clone(), parent_row, priority, 0)
                                .await?;
                        }
                        None => {
                            tracing::warn!(
                                table = %table.name,
                                parent = %fk.referenced_table,
                                "missing parent row referenced by foreign key; dropping child"
                            );
                            return Ok(());
                        }
                    }
                }
            }

            // Step 3: insert.
            let key_for_presence = table
                .primary_key
                .as_ref()
                .and_then(|pk| primary_key_tuple(&row, &pk.columns));
            match &key_for_presence {
                Some(key) => state.presence.add(&table_key, key.clone()),
                None => state.presence.add_pk_less(&table_key),
            }
            self.events.emit(&RowAdded {
                source_driver: self.source.database_type(),
                target_driver: self.target.database_type(),
                source_row: &row,
                target_table: &table_key,
                prioritized: priority,
            });
            let buffer = state.buffers.entry(table_key.clone()).or_default();
            buffer.push(row);
            if buffer.len() >= self.flush_size {
                self.flush_table(state, &table_key).await?;
            }

            // Step 4: bounded child expansion.
            if child_budget > 0 {
                self.expand_children(state, &table_key, priority, child_budget).await?;
            }

            Ok(())
        })
    }

    /// Flush every non-empty buffer (used at shutdown / interrupt, §5).
    pub async fn flush_all(&self, state: &mut CopyState) -> Result<()> {
        let keys: Vec<String> = state.buffers.keys().cloned().collect();
        for key in keys {
            self.flush_table(state, &key).await?;
        }
        Ok(())
    }

    async fn flush_table(&self, state: &mut CopyState, table_key: &str) -> Result<()> {
        let Some(rows) = state.buffers.get_mut(table_key).map(std::mem::take) else {
            return Ok(());
        };
        if rows.is_empty() {
            return Ok(());
        }
        let Some(table) = self.schema.tables.get(table_key) else {
            return Ok(());
        };
        let outcome = self.target.insert_batch(table, &rows).await?;
        for (idx, reason) in &outcome.skipped {
            tracing::warn!(table = %table_key, row = idx, reason = %reason, "row dropped on insert");
        }
        *state.inserted.entry(table_key.to_string()).or_insert(0) += outcome.inserted as i64;
        Ok(())
    }

    async fn expand_children(
        &self,
        state: &mut CopyState,
        table_key: &str,
        priority: bool,
        child_budget: i64,
    ) -> Result<()> {
        let Some(table) = self.schema.tables.get(table_key) else {
            return Ok(());
        };
        // Re-fetch the just-inserted row's anchor values from the buffer
        // we just pushed into, since we no longer hold `row` by value.
        let Some(anchor_row) = state.buffers.get(table_key).and_then(|b| b.last()) else {
            return Ok(());
        };
        let anchor_row = anchor_row.clone();

        let incoming: Vec<(String, crate::schema::types::ForeignKey)> = self
            .schema
            .tables
            .iter()
            .filter(|(_, t)| t.selected)
            .flat_map(|(child_key, t)| {
                t.foreign_keys
                    .iter()
                    .filter(|fk| fk.targets(table))
                    .map(|fk| (child_key.clone(), fk.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (child_key, fk) in incoming {
            let Some(parent_values) = foreign_key_tuple_from_referenced(&anchor_row, &fk.referenced_columns) else {
                continue;
            };
            let Some(child_table) = self.schema.tables.get(&child_key) else {
                continue;
            };

            // Priority rows (forced / full-table) are exempt from the
            // per-parent `--children` cap entirely: the fetch itself is
            // unbounded, and only the depth budget (decremented below,
            // per recursive call) limits how far the closure runs.
            let cap = if priority { i64::MAX } else { self.children_cap.min(child_budget) };
            if cap <= 0 {
                continue;
            }

            let children = self.source.fetch_children(child_table, &fk, &parent_values, cap).await?;
            for child_row in children {
                self.propagate(&mut *state, child_key.clone(), child_row, priority, child_budget - 1)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Like [`foreign_key_tuple`] but pulls the *referenced* columns (the
/// parent's own anchor values) rather than a child's constrained columns.
fn foreign_key_tuple_from_referenced(row: &Row, referenced_columns: &[String]) -> Option<Vec<crate::value::Value>> {
    foreign_key_tuple(row, referenced_columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::introspect::{build_schema_model, ModelOptions};
    use crate::schema::sqlite::SqliteDriver;
    use crate::value::Value;
    use sqlx::Executor;
    use subsetkit_testutil::parent_child_fixture;

    #[test]
    fn copy_state_starts_empty() {
        let state = CopyState::new();
        assert_eq!(state.presence.count("anything"), 0);
        assert!(state.buffers.is_empty());
    }

    /// P9: propagating the exact same row twice within one run inserts it
    /// exactly once. The presence-index check at step 1 of `propagate` is
    /// what's supposed to make this hold regardless of how many times a
    /// caller (e.g. two overlapping FK paths) reaches the same row.
    #[tokio::test]
    async fn propagating_the_same_row_twice_inserts_once() {
        let source_pool = parent_child_fixture(50).await;
        let target_pool = sqlx::SqlitePool::connect(":memory:").await.unwrap();
        target_pool
            .execute(
                "CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT);
                 CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL, \
                    FOREIGN KEY(parent_id) REFERENCES parent(id));",
            )
            .await
            .unwrap();

        let source = SqliteDriver::new(source_pool);
        let target = SqliteDriver::new(target_pool.clone());
        let opts = ModelOptions {
            fraction: 0.1,
            ..Default::default()
        };
        let schema = build_schema_model(&source, &opts).await.unwrap();

        let events = EventBus::new();
        let propagator = Propagator {
            source: &source,
            target: &target,
            schema: &schema,
            children_cap: 3,
            flush_size: 1000,
            events: &events,
        };

        let mut state = CopyState::new();
        let row = source.fetch_by_key(schema.tables.get("parent").unwrap(), &[Value::Int(1)]).await.unwrap().unwrap();

        propagator.propagate(&mut state, "parent".to_string(), row.clone(), false, 0).await.unwrap();
        propagator.propagate(&mut state, "parent".to_string(), row, false, 0).await.unwrap();
        propagator.flush_all(&mut state).await.unwrap();

        assert_eq!(state.presence.count("parent"), 1);
        let copied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM parent WHERE id = 1")
            .fetch_one(&target_pool)
            .await
            .unwrap();
        assert_eq!(copied, 1, "the same row propagated twice must only be inserted once");
    }
}
