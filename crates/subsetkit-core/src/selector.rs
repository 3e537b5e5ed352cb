//! Selector (§4.3): produces randomized candidate rows for a table, and the
//! exact-key lookup the coordinator needs for forced rows. Mostly a thin
//! facade over [`Driver`]; the uniform-sampling strategy (numeric-PK range
//! vs. database-random-order) lives behind the driver boundary so this
//! module never branches on dialect.
//!
//! The propagator's parent/child traversal calls [`Driver`] directly rather
//! than through here — it already owns `&dyn Driver` references, not a
//! `Selector`, and its lookups aren't the random-candidate kind this facade
//! is for.

use crate::driver::Driver;
use crate::error::Result;
use crate::row::Row;
use crate::schema::types::Table;
use crate::value::Value;

pub struct Selector<'d> {
    driver: &'d dyn Driver,
}

impl<'d> Selector<'d> {
    pub fn new(driver: &'d dyn Driver) -> Self {
        Self { driver }
    }

    /// A uniform-random candidate batch of up to `k` rows. Candidates are
    /// returned regardless of target presence; the propagator filters.
    pub async fn sample(&self, table: &Table, k: i64) -> Result<Vec<Row>> {
        self.driver.sample(table, k).await
    }

    /// The single row whose PK equals `key`, used for forced rows and
    /// parent-closure lookups.
    pub async fn fetch_by_key(&self, table: &Table, key: &[Value]) -> Result<Option<Row>> {
        self.driver.fetch_by_key(table, key).await
    }
}
