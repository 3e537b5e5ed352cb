//! The Coordinator (§4.5): the top-level loop. Resolves forced rows and
//! full-table requests first (both priority), then drives per-table
//! primary-selection quotas until every selected table meets its target
//! count or its source is exhausted, and finally advances sequences.
//!
//! Termination (P8) follows from marking a table *saturated* the moment a
//! batch yields zero new insertions: the set of "selected, not yet met,
//! not saturated" tables can only shrink, one entry at a time, so the main
//! loop runs at most `tables.len()` rounds regardless of cyclic FKs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::driver::Driver;
use crate::error::{Result, SubsetError};
use crate::propagator::{CopyState, Propagator};
use crate::schema::types::DatabaseSchema;
use crate::selector::Selector;
use crate::value::Value;

/// A `--force=TABLE:PK` directive, already parsed to a scalar (§6, §9 open
/// question b: composite PKs are not supported here).
#[derive(Debug, Clone)]
pub struct ForceDirective {
    pub table: String,
    pub pk: Value,
}

/// Knobs the CLI collects that shape how the coordinator drives the copy,
/// distinct from [`crate::schema::introspect::ModelOptions`] which shapes
/// the schema model itself.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// `--children=N`: per-parent child fetch cap for non-priority rows.
    pub children_cap: i64,
    /// Child-expansion depth budget, used for forced rows, full-table rows,
    /// and every main-loop candidate alike (§4.5 calls the forced-row and
    /// full-table budgets "full"/"default", both of which this crate takes
    /// to mean the same configured depth).
    pub depth_budget: i64,
    /// Buffered-insertion flush size (`--buffer=N`).
    pub flush_size: usize,
    /// Bounded constant capping how many candidates the main loop samples
    /// per round, independent of a table's remaining gap.
    pub batch_cap: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            children_cap: 3,
            depth_budget: 3,
            flush_size: 1000,
            batch_cap: 200,
        }
    }
}

/// Per-table rows actually flushed to the target, for the CLI's summary
/// table (§6 "Progress & summary reporting").
#[derive(Debug, Clone)]
pub struct TableSummary {
    pub table: String,
    pub copied: i64,
    pub target: i64,
    pub source: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tables: Vec<TableSummary>,
    pub interrupted: bool,
}

pub struct Coordinator<'a> {
    pub schema: &'a DatabaseSchema,
    pub propagator: Propagator<'a>,
    pub config: CoordinatorConfig,
}

impl<'a> Coordinator<'a> {
    pub fn new(schema: &'a DatabaseSchema, propagator: Propagator<'a>, config: CoordinatorConfig) -> Self {
        Self { schema, propagator, config }
    }

    fn source(&self) -> &'a dyn Driver {
        self.propagator.source
    }

    /// Run the full copy: forced rows, full tables, main loop, finalize.
    /// `interrupted` is checked between units of work so a signal handler
    /// can request an early, consistent stop (§5 cancellation).
    pub async fn run(
        &self,
        state: &mut CopyState,
        forced: &[ForceDirective],
        full_tables: &[String],
        interrupted: &AtomicBool,
    ) -> Result<RunSummary> {
        self.run_forced_rows(state, forced).await?;

        if !interrupted.load(Ordering::Relaxed) {
            self.run_full_tables(state, full_tables, interrupted).await?;
        }

        if !interrupted.load(Ordering::Relaxed) {
            self.run_main_loop(state, interrupted).await?;
        }

        self.propagator.flush_all(state).await?;

        let was_interrupted = interrupted.load(Ordering::Relaxed);
        if !was_interrupted {
            self.finalize_sequences().await;
        }

        Ok(self.summarize(state, was_interrupted))
    }

    /// Step 1 (§4.5): every forced row must exist in the source, or the
    /// whole run aborts (`ForcedRowNotFound` is fatal per §7).
    async fn run_forced_rows(&self, state: &mut CopyState, forced: &[ForceDirective]) -> Result<()> {
        let selector = Selector::new(self.source());
        for directive in forced {
            let table_key = self
                .schema
                .find_table(&directive.table)
                .map(|t| t.qualified_name())
                .ok_or_else(|| SubsetError::UnknownTable {
                    table: directive.table.clone(),
                    context: "--force".to_string(),
                })?;
            let table = self.schema.tables.get(&table_key).expect("resolved above");
            let Some(pk) = &table.primary_key else {
                return Err(SubsetError::ForcedRowNotFound {
                    table: directive.table.clone(),
                    pk: directive.pk.to_string(),
                });
            };
            if pk.columns.len() != 1 {
                return Err(SubsetError::CompositeForceUnsupported {
                    table: directive.table.clone(),
                    pk: directive.pk.to_string(),
                });
            }
            let row = selector
                .fetch_by_key(table, std::slice::from_ref(&directive.pk))
                .await?
                .ok_or_else(|| SubsetError::ForcedRowNotFound {
                    table: directive.table.clone(),
                    pk: directive.pk.to_string(),
                })?;
            self.propagator
                .propagate(state, table_key, row, true, self.config.depth_budget)
                .await?;
        }
        Ok(())
    }

    /// Step 2 (§4.5): every row of a `--full-table` table is propagated
    /// with priority. Sampling the full source count back from the
    /// selector is equivalent to "iterate all rows" since `k >= n` makes
    /// every driver's sample path return the entire table (§4.3).
    async fn run_full_tables(
        &self,
        state: &mut CopyState,
        full_tables: &[String],
        interrupted: &AtomicBool,
    ) -> Result<()> {
        let selector = Selector::new(self.source());
        for name in full_tables {
            let table_key = self
                .schema
                .find_table(name)
                .map(|t| t.qualified_name())
                .ok_or_else(|| SubsetError::UnknownTable {
                    table: name.clone(),
                    context: "--full-table".to_string(),
                })?;
            let table = self.schema.tables.get(&table_key).expect("resolved above");
            let rows = selector.sample(table, table.source_row_count.max(1)).await?;
            for row in rows {
                if interrupted.load(Ordering::Relaxed) {
                    return Ok(());
                }
                self.propagator
                    .propagate(state, table_key.clone(), row, true, self.config.depth_budget)
                    .await?;
            }
        }
        Ok(())
    }

    /// Step 3 (§4.5): repeatedly pick the least-complete, not-yet-saturated
    /// selected table and pull a bounded batch of candidates into it.
    async fn run_main_loop(&self, state: &mut CopyState, interrupted: &AtomicBool) -> Result<()> {
        let selector = Selector::new(self.source());
        let mut saturated: HashSet<String> = HashSet::new();

        loop {
            if interrupted.load(Ordering::Relaxed) {
                return Ok(());
            }

            let Some(table_key) = self.pick_next_table(state, &saturated) else {
                break;
            };
            let table = self.schema.tables.get(&table_key).expect("picked from schema");

            let copied = state.presence.count(&table_key);
            let gap = (table.target_row_count - copied).max(1);
            let batch_size = gap.min(self.config.batch_cap);

            let candidates = selector.sample(table, batch_size).await?;
            if candidates.is_empty() {
                saturated.insert(table_key);
                continue;
            }

            let before = state.presence.count(&table_key);
            for row in candidates {
                self.propagator
                    .propagate(state, table_key.clone(), row, false, self.config.depth_budget)
                    .await?;
            }
            let after = state.presence.count(&table_key);

            // Zero new insertions this round means every candidate was
            // already present or unreferentiable: further sampling of this
            // table cannot make progress, so it saturates now rather than
            // risking an unbounded retry loop (P8).
            if after == before {
                saturated.insert(table_key);
            }
        }
        Ok(())
    }

    /// Lowest completeness score among selected, not-yet-met, not-saturated
    /// tables; ties broken by qualified table name (§4.5 step a).
    fn pick_next_table(&self, state: &CopyState, saturated: &HashSet<String>) -> Option<String> {
        self.schema
            .tables
            .iter()
            .filter(|(key, table)| {
                table.selected
                    && !saturated.contains(*key)
                    && state.presence.count(key) < table.target_row_count
            })
            .map(|(key, table)| (key.clone(), table.completeness(state.presence.count(key))))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(key, _)| key)
    }

    /// Step 4 (§4.5): advance every selected table's auto-generated-key
    /// sequence. Best-effort and per-driver (I4) — a failure here is
    /// logged by the driver impl, never fatal.
    async fn finalize_sequences(&self) {
        for table in self.schema.tables.values() {
            if !table.selected {
                continue;
            }
            if let Err(e) = self.propagator.target.advance_sequence(table).await {
                tracing::warn!(table = %table.name, error = %e, "sequence advance failed");
            }
        }
    }

    fn summarize(&self, state: &CopyState, interrupted: bool) -> RunSummary {
        let tables = self
            .schema
            .tables
            .iter()
            .filter(|(_, t)| t.selected)
            .map(|(key, table)| TableSummary {
                table: table.qualified_name(),
                copied: *state.inserted.get(key).unwrap_or(&0),
                target: table.target_row_count,
                source: table.source_row_count,
            })
            .collect();
        RunSummary { tables, interrupted }
    }
}

/// Resolve a `--force=TABLE:PK` CLI string into a directive, parsing the PK
/// as an integer when possible and falling back to a string scalar
/// otherwise (composite keys are rejected later, once the schema model can
/// confirm the table's actual PK arity).
pub fn parse_force_directive(raw: &str) -> Result<ForceDirective> {
    let (table, pk) = raw.split_once(':').ok_or_else(|| SubsetError::Config {
        message: format!("--force='{raw}' must be in TABLE:PK form"),
    })?;
    let value = match pk.parse::<i64>() {
        Ok(n) => Value::Int(n),
        Err(_) => Value::String(pk.to_string().into()),
    };
    Ok(ForceDirective {
        table: table.to_string(),
        pk: value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_force_directive() {
        let d = parse_force_directive("orders:42").unwrap();
        assert_eq!(d.table, "orders");
        assert_eq!(d.pk, Value::Int(42));
    }

    #[test]
    fn parses_string_force_directive() {
        let d = parse_force_directive("customers:abc-123").unwrap();
        assert_eq!(d.pk, Value::String("abc-123".to_string().into()));
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(parse_force_directive("orders").is_err());
    }
}
