//! PostgreSQL [`Driver`](crate::driver::Driver) impl: `information_schema`
//! introspection, numeric-PK range sampling with `ORDER BY random()`
//! fallback, and `setval(pg_get_serial_sequence(...))` sequence advance.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use indexmap::IndexMap;
use rand::Rng;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column as _, Row as SqlxRow};

use crate::driver::{Driver, InsertOutcome};
use crate::error::{Result, SubsetError};
use crate::row::Row;
use crate::schema::types::*;
use crate::value::Value;

pub struct PostgresDriver {
    pool: PgPool,
    database_name: String,
}

impl PostgresDriver {
    pub fn new(pool: PgPool, database_name: String) -> Self {
        Self {
            pool,
            database_name,
        }
    }

    async fn introspect_tables(&self, schema_name: &str) -> Result<IndexMap<String, Table>> {
        let query = "SELECT table_name FROM information_schema.tables \
                     WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name";
        let rows = sqlx::query(query)
            .bind(schema_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection {
                query: "fetch tables".to_string(),
                source: e,
            })?;

        let mut tables = IndexMap::new();
        for row in rows {
            let name: String = row.get("table_name");
            let mut table = Table::new(name.clone());
            table.schema_name = Some(schema_name.to_string());
            tables.insert(name, table);
        }
        Ok(tables)
    }

    async fn introspect_columns(
        &self,
        schema_name: &str,
        tables: &mut IndexMap<String, Table>,
    ) -> Result<()> {
        let query = r#"
            SELECT
                c.table_name, c.column_name, c.data_type, c.udt_name,
                c.is_nullable, c.column_default, c.character_maximum_length,
                c.numeric_precision, c.numeric_scale, c.ordinal_position
            FROM information_schema.columns c
            WHERE c.table_schema = $1
            ORDER BY c.table_name, c.ordinal_position
        "#;
        let rows = sqlx::query(query)
            .bind(schema_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection {
                query: "fetch columns".to_string(),
                source: e,
            })?;

        for row in rows {
            let table_name: String = row.get("table_name");
            let column_name: String = row.get("column_name");
            let data_type_str: String = row.get("data_type");
            let udt_name: String = row.get("udt_name");
            let is_nullable: String = row.get("is_nullable");
            let column_default: Option<String> = row.get("column_default");
            let max_length: Option<i32> = row.get("character_maximum_length");
            let numeric_precision: Option<i32> = row.get("numeric_precision");
            let numeric_scale: Option<i32> = row.get("numeric_scale");
            let ordinal_position: i32 = row.get("ordinal_position");

            let data_type = if data_type_str == "USER-DEFINED" {
                DataType::Enum(udt_name.clone())
            } else if data_type_str == "ARRAY" {
                let inner = udt_name
                    .strip_prefix('_')
                    .map(DataType::from_raw)
                    .unwrap_or_else(|| DataType::from_raw(&udt_name));
                DataType::Array(Box::new(inner))
            } else {
                DataType::from_raw(&data_type_str)
            };

            let is_auto = column_default
                .as_deref()
                .map(|d| d.starts_with("nextval("))
                .unwrap_or(false);

            let mut column = Column::new(column_name.clone(), data_type, data_type_str.clone());
            column.nullable = is_nullable == "YES";
            column.has_default = column_default.is_some();
            column.is_auto_increment = is_auto;
            column.max_length = max_length.map(|v| v as u32);
            column.numeric_precision = numeric_precision.map(|v| v as u32);
            column.numeric_scale = numeric_scale.map(|v| v as u32);
            column.ordinal_position = ordinal_position as u32;

            if let Some(table) = tables.get_mut(&table_name) {
                table.columns.insert(column_name, column);
            }
        }
        Ok(())
    }

    async fn introspect_primary_keys(
        &self,
        schema_name: &str,
        tables: &mut IndexMap<String, Table>,
    ) -> Result<()> {
        let query = r#"
            SELECT tc.table_name, tc.constraint_name, kcu.column_name, kcu.ordinal_position
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
            WHERE tc.table_schema = $1 AND tc.constraint_type = 'PRIMARY KEY'
            ORDER BY tc.table_name, kcu.ordinal_position
        "#;
        let rows = sqlx::query(query)
            .bind(schema_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection {
                query: "fetch primary keys".to_string(),
                source: e,
            })?;

        let mut pk_map: IndexMap<String, (Option<String>, Vec<String>)> = IndexMap::new();
        for row in rows {
            let table_name: String = row.get("table_name");
            let constraint_name: String = row.get("constraint_name");
            let column_name: String = row.get("column_name");
            pk_map
                .entry(table_name)
                .or_insert_with(|| (Some(constraint_name), Vec::new()))
                .1
                .push(column_name);
        }
        for (table_name, (name, columns)) in pk_map {
            if let Some(table) = tables.get_mut(&table_name) {
                table.primary_key = Some(PrimaryKey { columns, name });
            }
        }
        Ok(())
    }

    async fn introspect_foreign_keys(
        &self,
        schema_name: &str,
        tables: &mut IndexMap<String, Table>,
    ) -> Result<()> {
        let query = r#"
            SELECT
                tc.table_name, tc.constraint_name, kcu.column_name,
                ccu.table_schema AS referenced_schema,
                ccu.table_name AS referenced_table_name,
                ccu.column_name AS referenced_column_name,
                rc.delete_rule, rc.update_rule, tc.is_deferrable
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
                ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema
            JOIN information_schema.referential_constraints rc
                ON tc.constraint_name = rc.constraint_name AND tc.table_schema = rc.constraint_schema
            WHERE tc.table_schema = $1 AND tc.constraint_type = 'FOREIGN KEY'
            ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position
        "#;
        let rows = sqlx::query(query)
            .bind(schema_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection {
                query: "fetch foreign keys".to_string(),
                source: e,
            })?;

        let mut fk_map: IndexMap<(String, String), ForeignKey> = IndexMap::new();
        for row in rows {
            let table_name: String = row.get("table_name");
            let constraint_name: String = row.get("constraint_name");
            let column_name: String = row.get("column_name");
            let ref_schema: String = row.get("referenced_schema");
            let ref_table: String = row.get("referenced_table_name");
            let ref_column: String = row.get("referenced_column_name");
            let delete_rule: String = row.get("delete_rule");
            let update_rule: String = row.get("update_rule");
            let is_deferrable: String = row.get("is_deferrable");

            let key = (table_name, constraint_name.clone());
            let entry = fk_map.entry(key).or_insert_with(|| ForeignKey {
                name: Some(constraint_name),
                source_columns: Vec::new(),
                referred_schema: Some(ref_schema),
                referenced_table: ref_table,
                referenced_columns: Vec::new(),
                on_delete: ForeignKeyAction::parse_action(&delete_rule),
                on_update: ForeignKeyAction::parse_action(&update_rule),
                is_deferrable: is_deferrable == "YES",
                is_logical: false,
            });
            entry.source_columns.push(column_name);
            entry.referenced_columns.push(ref_column);
        }

        for ((table_name, _), fk) in fk_map {
            if let Some(table) = tables.get_mut(&table_name) {
                table.foreign_keys.push(fk);
            }
        }
        Ok(())
    }

    async fn introspect_enums(&self, schema_name: &str) -> Result<IndexMap<String, Vec<String>>> {
        let query = r#"
            SELECT t.typname AS enum_name, e.enumlabel AS enum_value
            FROM pg_type t
            JOIN pg_enum e ON t.oid = e.enumtypid
            JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
            WHERE n.nspname = $1
            ORDER BY t.typname, e.enumsortorder
        "#;
        let rows = sqlx::query(query)
            .bind(schema_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection {
                query: "fetch enums".to_string(),
                source: e,
            })?;

        let mut enums: IndexMap<String, Vec<String>> = IndexMap::new();
        for row in rows {
            let enum_name: String = row.get("enum_name");
            let enum_value: String = row.get("enum_value");
            enums.entry(enum_name).or_default().push(enum_value);
        }
        Ok(enums)
    }

    async fn numeric_pk_bounds(&self, table: &Table, pk_col: &str) -> Result<Option<(i64, i64)>> {
        let sql = format!(
            "SELECT MIN({col}) AS lo, MAX({col}) AS hi FROM {tbl}",
            col = self.quote_ident(pk_col),
            tbl = qualified_ident(self, table),
        );
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection {
                query: sql.clone(),
                source: e,
            })?;
        let lo: Option<i64> = row.try_get("lo").ok();
        let hi: Option<i64> = row.try_get("hi").ok();
        Ok(lo.zip(hi))
    }
}

fn qualified_ident(driver: &PostgresDriver, table: &Table) -> String {
    match &table.schema_name {
        Some(s) => format!("{}.{}", driver.quote_ident(s), driver.quote_ident(&table.name)),
        None => driver.quote_ident(&table.name),
    }
}

/// Decode a single column out of a `PgRow` into our dynamic [`Value`],
/// dispatching on the column's normalized `DataType` rather than the raw
/// driver type string, so introspection and row reading agree.
fn decode_pg_value(row: &PgRow, idx: usize, data_type: &DataType) -> Result<Value> {
    macro_rules! get {
        ($t:ty, $wrap:expr) => {
            row.try_get::<Option<$t>, _>(idx)
                .map(|o| o.map($wrap).unwrap_or(Value::Null))
                .map_err(|e| decode_err(row, idx, e))
        };
    }
    match data_type {
        DataType::SmallInt => get!(i16, |v: i16| Value::Int(v as i64)),
        DataType::Integer | DataType::Serial => get!(i32, |v: i32| Value::Int(v as i64)),
        DataType::BigInt | DataType::BigSerial => get!(i64, Value::Int),
        DataType::Float => get!(f32, |v: f32| Value::Float(v as f64)),
        DataType::Double => get!(f64, Value::Float),
        DataType::Numeric | DataType::Money => get!(BigDecimal, |v: BigDecimal| Value::Float(
            v.to_f64().unwrap_or(0.0)
        )),
        DataType::Boolean => get!(bool, Value::Bool),
        DataType::Date => get!(chrono::NaiveDate, Value::Date),
        DataType::Time => get!(chrono::NaiveTime, Value::Time),
        DataType::Timestamp | DataType::TimestampTz => {
            get!(chrono::NaiveDateTime, Value::Timestamp)
        }
        DataType::Uuid => get!(uuid::Uuid, Value::Uuid),
        DataType::Json | DataType::Jsonb => get!(serde_json::Value, Value::Json),
        DataType::Binary => get!(Vec<u8>, Value::Bytes),
        DataType::Array(inner) => {
            let raw = row
                .try_get_raw(idx)
                .map_err(|e| decode_err(row, idx, e))?;
            if sqlx::ValueRef::is_null(&raw) {
                return Ok(Value::Null);
            }
            match inner.as_ref() {
                t if t.is_numeric() => get_array::<i64>(row, idx).map(|v| {
                    Value::Array(v.into_iter().map(Value::Int).collect())
                }),
                _ => get_array::<String>(row, idx).map(|v| {
                    Value::Array(v.into_iter().map(|s| Value::String(s.into())).collect())
                }),
            }
        }
        // Enum columns round-trip through Postgres text representation.
        DataType::Enum(_) | DataType::Xml | DataType::Inet | DataType::MacAddr | DataType::Interval
        | DataType::Char | DataType::VarChar | DataType::Text | DataType::Unknown(_) => {
            get!(String, |v: String| Value::String(v.into()))
        }
    }
}

fn get_array<T>(row: &PgRow, idx: usize) -> Result<Vec<T>>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<Vec<T>>, _>(idx)
        .map(|o| o.unwrap_or_default())
        .map_err(|e| decode_err(row, idx, e))
}

fn decode_err(row: &PgRow, idx: usize, e: sqlx::Error) -> SubsetError {
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

fn row_to_dynamic(row: &PgRow, table: &Table) -> Result<Row> {
    let mut out = Row::new();
    for (idx, (name, col)) in table.columns.iter().enumerate() {
        out.insert(name.clone(), decode_pg_value(row, idx, &col.data_type)?);
    }
    Ok(out)
}

fn select_columns_sql(table: &Table) -> String {
    table
        .columns
        .keys()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Driver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    async fn introspect(&self, schemas: &[String]) -> Result<DatabaseSchema> {
        let mut schema = DatabaseSchema::new(DatabaseType::PostgreSQL, self.database_name.clone());
        let schema_names: Vec<String> = if schemas.is_empty() {
            vec!["public".to_string()]
        } else {
            schemas.to_vec()
        };

        for schema_name in &schema_names {
            let mut tables = self.introspect_tables(schema_name).await?;
            self.introspect_columns(schema_name, &mut tables).await?;
            self.introspect_primary_keys(schema_name, &mut tables).await?;
            self.introspect_foreign_keys(schema_name, &mut tables).await?;
            let enums = self.introspect_enums(schema_name).await?;

            for table in tables.values_mut() {
                for column in table.columns.values_mut() {
                    if let DataType::Enum(ref enum_name) = column.data_type {
                        if let Some(values) = enums.get(enum_name) {
                            column.enum_values = Some(values.clone());
                        }
                    }
                }
                let key = table.qualified_name();
                schema.tables.insert(key, table.clone());
            }
            schema.enums.extend(enums);
        }
        Ok(schema)
    }

    async fn row_count(&self, table: &Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", qualified_ident(self, table));
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
        let cols = select_columns_sql(table);
        let from = qualified_ident(self, table);

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

        let sql = format!("SELECT {cols} FROM {from} ORDER BY random() LIMIT {k}");
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
        let cols = select_columns_sql(table);
        let from = qualified_ident(self, table);
        let where_clause: Vec<String> = pk
            .columns
            .iter()
            .map(|c| self.quote_ident(c))
            .zip(key.iter())
            .map(|(c, v)| format!("{c} = {}", v.to_sql_literal(&DatabaseType::PostgreSQL)))
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
        let cols = select_columns_sql(child);
        let from = qualified_ident(self, child);
        let where_clause: Vec<String> = fk
            .source_columns
            .iter()
            .map(|c| self.quote_ident(c))
            .zip(parent_values.iter())
            .map(|(c, v)| format!("{c} = {}", v.to_sql_literal(&DatabaseType::PostgreSQL)))
            .collect();
        let sql = format!(
            "SELECT {cols} FROM {from} WHERE {} ORDER BY random() LIMIT {cap}",
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
        let sql = build_insert_sql(self, table, rows, &DatabaseType::PostgreSQL);
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
        if !(column.is_auto_increment || column.data_type.is_serial()) {
            return Ok(());
        }
        let ident = qualified_ident(self, table);
        let sql = format!(
            "SELECT setval(pg_get_serial_sequence('{}', '{}'), COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
            ident.replace('"', ""),
            col,
            self.quote_ident(col),
            ident,
        );
        if let Err(e) = sqlx::query(&sql).execute(&self.pool).await {
            tracing::warn!(table = %table.name, error = %e, "sequence advance failed, continuing");
        }
        Ok(())
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

impl PostgresDriver {
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
        // Dense/small ranges degrade to an ordered scan rather than
        // retrying misses forever (§4.3).
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
            let candidate = rng.random_range(lo..=hi);
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
            let sql = build_insert_sql(self, table, std::slice::from_ref(row), &DatabaseType::PostgreSQL);
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

/// Build a batched `INSERT INTO ... VALUES (...), (...)` statement. Shared
/// shape across dialects; only the identifier quoting and literal encoding
/// (via [`Value::to_sql_literal`]) differ.
pub fn build_insert_sql(driver: &dyn Driver, table: &Table, rows: &[Row], db_type: &DatabaseType) -> String {
    let columns: Vec<&String> = rows[0].keys().collect();
    let col_list = columns
        .iter()
        .map(|c| driver.quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let table_ident = match &table.schema_name {
        Some(s) => format!("{}.{}", driver.quote_ident(s), driver.quote_ident(&table.name)),
        None => driver.quote_ident(&table.name),
    };
    let values: Vec<String> = rows
        .iter()
        .map(|row| {
            let vals: Vec<String> = columns
                .iter()
                .map(|c| row.get(*c).unwrap_or(&Value::Null).to_sql_literal(db_type))
                .collect();
            format!("({})", vals.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {table_ident} ({col_list}) VALUES {}",
        values.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_range_span_under_threshold_uses_scan() {
        // span of 10 for k=5 is <= (5*3).max(50) => scan path taken;
        // this just documents the threshold, behavior verified in the
        // integration suite against a live pool.
        let span: i64 = 10;
        let k: i64 = 5;
        assert!(span <= (k * 3).max(50));
    }
}
