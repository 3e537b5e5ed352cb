//! SQLite [`Driver`](crate::driver::Driver) impl: `PRAGMA table_info`/
//! `PRAGMA foreign_key_list` introspection, `ORDER BY RANDOM()` sampling,
//! and a best-effort `sqlite_sequence` update for sequence advance.
//!
//! SQLite has no schema namespacing, so the `schemas` argument to
//! [`Driver::introspect`] is accepted but ignored — every table lives in
//! the single implicit schema.

use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column as _, Row as SqlxRow};

use crate::driver::{Driver, InsertOutcome};
use crate::error::{Result, SubsetError};
use crate::row::Row;
use crate::schema::postgres::build_insert_sql;
use crate::schema::types::*;
use crate::value::Value;

pub struct SqliteDriver {
    pool: SqlitePool,
}

impl SqliteDriver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn introspect_tables(&self) -> Result<IndexMap<String, Table>> {
        let query = "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection {
                query: "fetch tables".to_string(),
                source: e,
            })?;

        let mut tables = IndexMap::new();
        for row in rows {
            let name: String = row.get("name");
            tables.insert(name.clone(), Table::new(name));
        }
        Ok(tables)
    }

    async fn introspect_columns(&self, tables: &mut IndexMap<String, Table>) -> Result<()> {
        let table_names: Vec<String> = tables.keys().cloned().collect();
        for table_name in table_names {
            let query = format!("PRAGMA table_info({})", self.quote_ident(&table_name));
            let rows = sqlx::query(&query)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SubsetError::Introspection {
                    query: format!("PRAGMA table_info({table_name})"),
                    source: e,
                })?;

            let mut pk_cols: Vec<(i64, String)> = Vec::new();
            for row in &rows {
                let cid: i64 = row.get("cid");
                let name: String = row.get("name");
                let type_str: String = row.get("type");
                let notnull: i64 = row.get("notnull");
                let dflt_value: Option<String> = row.get("dflt_value");
                let pk: i64 = row.get("pk");

                let data_type = DataType::from_raw(&type_str);
                let is_auto = pk > 0 && type_str.to_uppercase().contains("INTEGER");

                let mut column = Column::new(name.clone(), data_type, type_str);
                column.nullable = notnull == 0;
                column.has_default = dflt_value.is_some();
                column.is_auto_increment = is_auto;
                column.ordinal_position = cid as u32;

                if pk > 0 {
                    pk_cols.push((pk, name.clone()));
                }

                if let Some(table) = tables.get_mut(&table_name) {
                    table.columns.insert(name, column);
                }
            }

            if !pk_cols.is_empty() {
                pk_cols.sort_by_key(|(ord, _)| *ord);
                if let Some(table) = tables.get_mut(&table_name) {
                    table.primary_key = Some(PrimaryKey {
                        columns: pk_cols.into_iter().map(|(_, name)| name).collect(),
                        name: None,
                    });
                }
            }
        }

        Ok(())
    }

    async fn introspect_foreign_keys(&self, tables: &mut IndexMap<String, Table>) -> Result<()> {
        let table_names: Vec<String> = tables.keys().cloned().collect();
        for table_name in table_names {
            let query = format!("PRAGMA foreign_key_list({})", self.quote_ident(&table_name));
            let rows = sqlx::query(&query)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SubsetError::Introspection {
                    query: format!("PRAGMA foreign_key_list({table_name})"),
                    source: e,
                })?;

            let mut fk_map: IndexMap<i64, ForeignKey> = IndexMap::new();
            for row in &rows {
                let id: i64 = row.get("id");
                let ref_table: String = row.get("table");
                let from: String = row.get("from");
                let to: String = row.get("to");
                let on_delete: String = row.get("on_delete");
                let on_update: String = row.get("on_update");

                let entry = fk_map.entry(id).or_insert_with(|| ForeignKey {
                    name: None,
                    source_columns: Vec::new(),
                    referred_schema: None,
                    referenced_table: ref_table,
                    referenced_columns: Vec::new(),
                    on_delete: ForeignKeyAction::parse_action(&on_delete),
                    on_update: ForeignKeyAction::parse_action(&on_update),
                    is_deferrable: false,
                    is_logical: false,
                });
                entry.source_columns.push(from);
                entry.referenced_columns.push(to);
            }

            if let Some(table) = tables.get_mut(&table_name) {
                for (_, fk) in fk_map {
                    table.foreign_keys.push(fk);
                }
            }
        }

        Ok(())
    }

    async fn numeric_pk_bounds(&self, table: &Table, pk_col: &str) -> Result<Option<(i64, i64)>> {
        let sql = format!(
            "SELECT MIN({col}) AS lo, MAX({col}) AS hi FROM {tbl}",
            col = self.quote_ident(pk_col),
            tbl = self.quote_ident(&table.name),
        );
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection { query: sql, source: e })?;
        let lo: Option<i64> = row.try_get("lo").ok();
        let hi: Option<i64> = row.try_get("hi").ok();
        Ok(lo.zip(hi))
    }

    async fn sample_numeric_pk(
        &self,
        table: &Table,
        cols: &str,
        from: &str,
        pk_col: &str,
        lo: i64,
        hi: i64,
        k: i64,
    ) -> Result<Vec<Row>> {
        let span = (hi - lo + 1).max(1);
        if span <= (k * 3).max(50) {
            let sql = format!("SELECT {cols} FROM {from} ORDER BY {pk_col} LIMIT {k}");
            let rows = sqlx::query(&sql)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| SubsetError::Introspection { query: sql, source: e })?;
            return rows.iter().map(|r| row_to_dynamic(r, table)).collect();
        }

        let mut found: Vec<Row> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut rng = rand::rng();
        let max_attempts = (k * 10).max(100);
        let mut attempts = 0;
        while found.len() < k as usize && attempts < max_attempts {
            attempts += 1;
            let candidate = rand::Rng::random_range(&mut rng, lo..=hi);
            if !seen.insert(candidate) {
                continue;
            }
            let sql = format!("SELECT {cols} FROM {from} WHERE {pk_col} = {candidate} LIMIT 1");
            let row = sqlx::query(&sql)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| SubsetError::Introspection { query: sql, source: e })?;
            if let Some(r) = row {
                found.push(row_to_dynamic(&r, table)?);
            }
        }
        Ok(found)
    }

    async fn insert_row_by_row(&self, table: &Table, rows: &[Row]) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        for (idx, row) in rows.iter().enumerate() {
            let sql = build_insert_sql(self, table, std::slice::from_ref(row), &DatabaseType::SQLite);
            match sqlx::query(&sql).execute(&self.pool).await {
                Ok(_) => outcome.inserted += 1,
                Err(e) => {
                    tracing::warn!(table = %table.name, row = idx, error = %e, "skipping row that failed insert");
                    outcome.skipped.push((idx, e.to_string()));
                }
            }
        }
        Ok(outcome)
    }
}

fn decode_sqlite_value(row: &SqliteRow, idx: usize, data_type: &DataType) -> Result<Value> {
    macro_rules! get {
        ($t:ty, $wrap:expr) => {
            row.try_get::<Option<$t>, _>(idx)
                .map(|o| o.map($wrap).unwrap_or(Value::Null))
                .map_err(|e| decode_err(row, idx, e))
        };
    }
    match data_type {
        DataType::SmallInt | DataType::Integer | DataType::BigInt | DataType::Serial | DataType::BigSerial => {
            get!(i64, Value::Int)
        }
        DataType::Float | DataType::Double | DataType::Numeric | DataType::Money => {
            get!(f64, Value::Float)
        }
        DataType::Boolean => get!(bool, Value::Bool),
        DataType::Date => get!(chrono::NaiveDate, Value::Date),
        DataType::Time => get!(chrono::NaiveTime, Value::Time),
        DataType::Timestamp | DataType::TimestampTz => get!(chrono::NaiveDateTime, Value::Timestamp),
        DataType::Json | DataType::Jsonb => get!(serde_json::Value, Value::Json),
        DataType::Binary => get!(Vec<u8>, Value::Bytes),
        DataType::Uuid | DataType::Array(_) | DataType::Enum(_) | DataType::Xml | DataType::Inet
        | DataType::MacAddr | DataType::Interval | DataType::Char | DataType::VarChar
        | DataType::Text | DataType::Unknown(_) => {
            get!(String, |v: String| Value::String(v.into()))
        }
    }
}

fn decode_err(row: &SqliteRow, idx: usize, e: sqlx::Error) -> SubsetError {
    let col_name = row
        .columns()
        .get(idx)
        .map(|c| c.name().to_string())
        .unwrap_or_default();
    SubsetError::Introspection {
        query: format!("decode column '{col_name}'"),
        source: e,
    }
}

fn row_to_dynamic(row: &SqliteRow, table: &Table) -> Result<Row> {
    let mut out = Row::new();
    for (idx, (name, col)) in table.columns.iter().enumerate() {
        out.insert(name.clone(), decode_sqlite_value(row, idx, &col.data_type)?);
    }
    Ok(out)
}

fn select_columns_sql(driver: &SqliteDriver, table: &Table) -> String {
    table
        .columns
        .keys()
        .map(|c| driver.quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Driver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn introspect(&self, _schemas: &[String]) -> Result<DatabaseSchema> {
        let mut schema = DatabaseSchema::new(DatabaseType::SQLite, "main".to_string());
        let mut tables = self.introspect_tables().await?;
        self.introspect_columns(&mut tables).await?;
        self.introspect_foreign_keys(&mut tables).await?;
        schema.tables = tables;
        Ok(schema)
    }

    async fn row_count(&self, table: &Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.quote_ident(&table.name));
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection { query: sql, source: e })?;
        Ok(row.get::<i64, _>("n"))
    }

    async fn sample(&self, table: &Table, k: i64) -> Result<Vec<Row>> {
        if k <= 0 {
            return Ok(Vec::new());
        }
        let cols = select_columns_sql(self, table);
        let from = self.quote_ident(&table.name);

        if let Some(pk) = &table.primary_key {
            if pk.columns.len() == 1 {
                if let Some(col) = table.columns.get(&pk.columns[0]) {
                    if col.data_type.is_numeric() {
                        if let Some((lo, hi)) = self.numeric_pk_bounds(table, &pk.columns[0]).await? {
                            return self.sample_numeric_pk(table, &cols, &from, &pk.columns[0], lo, hi, k).await;
                        }
                    }
                }
            }
        }

        let sql = format!("SELECT {cols} FROM {from} ORDER BY RANDOM() LIMIT {k}");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection { query: sql, source: e })?;
        rows.iter().map(|r| row_to_dynamic(r, table)).collect()
    }

    async fn fetch_by_key(&self, table: &Table, key: &[Value]) -> Result<Option<Row>> {
        let Some(pk) = &table.primary_key else {
            return Ok(None);
        };
        let cols = select_columns_sql(self, table);
        let from = self.quote_ident(&table.name);
        let where_clause: Vec<String> = pk
            .columns
            .iter()
            .map(|c| self.quote_ident(c))
            .zip(key.iter())
            .map(|(c, v)| format!("{c} = {}", v.to_sql_literal(&DatabaseType::SQLite)))
            .collect();
        let sql = format!("SELECT {cols} FROM {from} WHERE {} LIMIT 1", where_clause.join(" AND "));
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection { query: sql, source: e })?;
        row.map(|r| row_to_dynamic(&r, table)).transpose()
    }

    async fn fetch_children(
        &self,
        child: &Table,
        fk: &ForeignKey,
        parent_values: &[Value],
        cap: i64,
    ) -> Result<Vec<Row>> {
        if cap <= 0 {
            return Ok(Vec::new());
        }
        let cols = select_columns_sql(self, child);
        let from = self.quote_ident(&child.name);
        let where_clause: Vec<String> = fk
            .source_columns
            .iter()
            .map(|c| self.quote_ident(c))
            .zip(parent_values.iter())
            .map(|(c, v)| format!("{c} = {}", v.to_sql_literal(&DatabaseType::SQLite)))
            .collect();
        let sql = format!(
            "SELECT {cols} FROM {from} WHERE {} ORDER BY RANDOM() LIMIT {cap}",
            where_clause.join(" AND ")
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection { query: sql, source: e })?;
        rows.iter().map(|r| row_to_dynamic(r, child)).collect()
    }

    async fn insert_batch(&self, table: &Table, rows: &[Row]) -> Result<InsertOutcome> {
        if rows.is_empty() {
            return Ok(InsertOutcome::default());
        }
        let sql = build_insert_sql(self, table, rows, &DatabaseType::SQLite);
        match sqlx::query(&sql).execute(&self.pool).await {
            Ok(_) => Ok(InsertOutcome {
                inserted: rows.len(),
                skipped: Vec::new(),
            }),
            Err(e) => {
                tracing::warn!(table = %table.name, error = %e, "batch insert failed, retrying row-by-row");
                self.insert_row_by_row(table, rows).await
            }
        }
    }

    /// SQLite keeps auto-increment high-water marks in `sqlite_sequence`,
    /// populated only for tables declared `INTEGER PRIMARY KEY AUTOINCREMENT`.
    /// Best-effort: a table without that row (ordinary rowid alias, or no
    /// autoincrement) is left untouched rather than erroring (§4.6).
    async fn advance_sequence(&self, table: &Table) -> Result<()> {
        let Some(pk) = &table.primary_key else {
            return Ok(());
        };
        if pk.columns.len() != 1 {
            return Ok(());
        }
        let col = &pk.columns[0];
        let Some(column) = table.columns.get(col) else {
            return Ok(());
        };
        if !column.is_auto_increment {
            return Ok(());
        }
        let max_sql = format!(
            "SELECT COALESCE(MAX({}), 0) AS m FROM {}",
            self.quote_ident(col),
            self.quote_ident(&table.name)
        );
        let row = match sqlx::query(&max_sql).fetch_one(&self.pool).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(table = %table.name, error = %e, "sequence advance failed, continuing");
                return Ok(());
            }
        };
        let max_val: i64 = row.get("m");
        let update_sql = "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2";
        if let Err(e) = sqlx::query(update_sql)
            .bind(max_val)
            .bind(&table.name)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(table = %table.name, error = %e, "sequence advance failed, continuing");
        }
        Ok(())
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn introspects_fk_and_pk_from_pragmas() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE parent (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE child (id INTEGER PRIMARY KEY AUTOINCREMENT, parent_id INTEGER, \
             FOREIGN KEY(parent_id) REFERENCES parent(id));",
        )
        .execute(&pool)
        .await
        .unwrap();

        let driver = SqliteDriver::new(pool);
        let schema = driver.introspect(&[]).await.unwrap();
        let child = schema.tables.get("child").unwrap();
        assert_eq!(child.foreign_keys.len(), 1);
        assert_eq!(child.foreign_keys[0].referenced_table, "parent");
        assert_eq!(child.primary_key.as_ref().unwrap().columns, vec!["id"]);
    }
}
