//! # Driver abstraction (§4.6)
//!
//! The capability set every backend must provide: schema introspection, row
//! sampling, keyed row/child lookup, buffered insertion, sequence
//! advancement, and identifier quoting. The core never branches on dialect
//! name outside a `Driver` impl (§9 "Polymorphism over RDBMS dialects").
//!
//! Implemented with `async-trait` so the coordinator can hold the source and
//! target as `Box<dyn Driver>` without caring which of the three backends is
//! behind it.

use async_trait::async_trait;

use crate::error::Result;
use crate::row::Row;
use crate::schema::types::{DatabaseSchema, DatabaseType, ForeignKey, Table};
use crate::value::Value;

/// Outcome of a buffered insert attempt (§4.4 "Buffered insertion").
#[derive(Debug, Default, Clone)]
pub struct InsertOutcome {
    /// Rows that made it into the target.
    pub inserted: usize,
    /// Rows dropped during row-by-row isolation after a batch failure,
    /// paired with the reason, for the caller to log.
    pub skipped: Vec<(usize, String)>,
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Introspect every table in `schemas` (the default schema is always
    /// included by the caller when the list is empty).
    async fn introspect(&self, schemas: &[String]) -> Result<DatabaseSchema>;

    /// Total row count for `table`, used for target sizing (§4.1).
    async fn row_count(&self, table: &Table) -> Result<i64>;

    /// A uniform random sample of up to `k` rows from `table` (§4.3).
    /// Candidates are returned regardless of target presence; the
    /// propagator checks presence after fetch.
    async fn sample(&self, table: &Table, k: i64) -> Result<Vec<Row>>;

    /// The single row in `table` whose primary key equals `key`, if any.
    async fn fetch_by_key(&self, table: &Table, key: &[Value]) -> Result<Option<Row>>;

    /// Up to `cap` rows in `child` whose `fk` constrained columns equal
    /// `parent_values` (the parent's referred-column tuple).
    async fn fetch_children(
        &self,
        child: &Table,
        fk: &ForeignKey,
        parent_values: &[Value],
        cap: i64,
    ) -> Result<Vec<Row>>;

    /// Bulk-insert `rows` into `table`. On an integrity error the whole
    /// batch is retried row-by-row so the offending row can be isolated and
    /// skipped without losing the rest of the batch (§4.4).
    async fn insert_batch(&self, table: &Table, rows: &[Row]) -> Result<InsertOutcome>;

    /// Advance `table`'s auto-generated-key sequence to at least
    /// `max(existing key) + 1` (I4). Best-effort: failure here is logged,
    /// not propagated as a fatal error.
    async fn advance_sequence(&self, table: &Table) -> Result<()>;

    /// Quote `name` as an identifier for this dialect.
    fn quote_ident(&self, name: &str) -> String;
}
