//! MySQL [`Driver`](crate::driver::Driver) impl: `information_schema`
//! introspection, `ORDER BY RAND()` sampling, and
//! `ALTER TABLE ... AUTO_INCREMENT = ?` sequence advance.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use indexmap::IndexMap;
use rand::Rng;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::{Column as _, Row as SqlxRow};

use crate::driver::{Driver, InsertOutcome};
use crate::error::{Result, SubsetError};
use crate::row::Row;
use crate::schema::postgres::build_insert_sql;
use crate::schema::types::*;
use crate::value::Value;

pub struct MySqlDriver {
    pool: MySqlPool,
    database_name: String,
}

impl MySqlDriver {
    pub fn new(pool: MySqlPool, database_name: String) -> Self {
        Self {
            pool,
            database_name,
        }
    }

    async fn introspect_tables(&self, schema_name: &str) -> Result<IndexMap<String, Table>> {
        let query = "SELECT table_name FROM information_schema.tables \
                     WHERE table_schema = ? AND table_type = 'BASE TABLE' ORDER BY table_name";
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
            SELECT table_name, column_name, data_type, column_type, is_nullable,
                   column_default, character_maximum_length, numeric_precision,
                   numeric_scale, ordinal_position, extra
            FROM information_schema.columns
            WHERE table_schema = ?
            ORDER BY table_name, ordinal_position
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
            let column_type: String = row.get("column_type");
            let is_nullable: String = row.get("is_nullable");
            let column_default: Option<String> = row.get("column_default");
            let max_length: Option<i64> = row.get("character_maximum_length");
            let numeric_precision: Option<i64> = row.get("numeric_precision");
            let numeric_scale: Option<i64> = row.get("numeric_scale");
            let ordinal_position: i64 = row.get("ordinal_position");
            let extra: String = row.get("extra");

            let (data_type, enum_values) = if data_type_str == "enum" || data_type_str == "set" {
                (
                    DataType::Enum(column_name.clone()),
                    Some(parse_mysql_enum_values(&column_type)),
                )
            } else {
                (DataType::from_raw(&data_type_str), None)
            };

            let is_auto = extra.contains("auto_increment");

            let mut column = Column::new(column_name.clone(), data_type, data_type_str);
            column.nullable = is_nullable == "YES";
            column.has_default = column_default.is_some();
            column.is_auto_increment = is_auto;
            column.max_length = max_length.map(|v| v as u32);
            column.numeric_precision = numeric_precision.map(|v| v as u32);
            column.numeric_scale = numeric_scale.map(|v| v as u32);
            column.ordinal_position = ordinal_position as u32;
            column.enum_values = enum_values;

            if let Some(table) = tables.get_mut(&table_name) {
                table.columns.insert(column_name, column);
            }
        }
        Ok(())
    }

    async fn introspect_primary_keys(&self, tables: &mut IndexMap<String, Table>) -> Result<()> {
        let query = r#"
            SELECT table_name, column_name, ordinal_position
            FROM information_schema.key_column_usage
            WHERE table_schema = ? AND constraint_name = 'PRIMARY'
            ORDER BY table_name, ordinal_position
        "#;
        let rows = sqlx::query(query)
            .bind(&self.database_name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SubsetError::Introspection {
                query: "fetch primary keys".to_string(),
                source: e,
            })?;

        let mut pk_map: IndexMap<String, Vec<String>> = IndexMap::new();
        for row in rows {
            let table_name: String = row.get("table_name");
            let column_name: String = row.get("column_name");
            pk_map.entry(table_name).or_default().push(column_name);
        }
        for (table_name, columns) in pk_map {
            if let Some(table) = tables.get_mut(&table_name) {
                table.primary_key = Some(PrimaryKey {
                    columns,
                    name: Some("PRIMARY".to_string()),
                });
            }
        }
        Ok(())
    }

    async fn introspect_foreign_keys(&self, tables: &mut IndexMap<String, Table>) -> Result<()> {
        let query = r#"
            SELECT
                kcu.table_name, kcu.constraint_name, kcu.column_name,
                kcu.referenced_table_schema, kcu.referenced_table_name, kcu.referenced_column_name,
                rc.delete_rule, rc.update_rule
            FROM information_schema.key_column_usage kcu
            JOIN information_schema.referential_constraints rc
                ON kcu.constraint_name = rc.constraint_name AND kcu.table_schema = rc.constraint_schema
            WHERE kcu.table_schema = ? AND kcu.referenced_table_name IS NOT NULL
            ORDER BY kcu.table_name, kcu.constraint_name, kcu.ordinal_position
        "#;
        let rows = sqlx::query(query)
            .bind(&self.database_name)
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
            let ref_schema: String = row.get("referenced_table_schema");
            let ref_table: String = row.get("referenced_table_name");
            let ref_column: String = row.get("referenced_column_name");
            let delete_rule: String = row.get("delete_rule");
            let update_rule: String = row.get("update_rule");

            let key = (table_name, constraint_name.clone());
            let entry = fk_map.entry(key).or_insert_with(|| ForeignKey {
                name: Some(constraint_name),
                source_columns: Vec::new(),
                referred_schema: Some(ref_schema),
                referenced_table: ref_table,
                referenced_columns: Vec::new(),
                on_delete: ForeignKeyAction::parse_action(&delete_rule),
                on_update: ForeignKeyAction::parse_action(&update_rule),
                is_deferrable: false,
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

    async fn insert_row_by_row(&self, table: &Table, rows: &[Row]) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        for (idx, row) in rows.iter().enumerate() {
            let sql = build_insert_sql(self, table, std::slice::from_ref(row), &DatabaseType::MySQL);
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
}

/// Parse MySQL enum/set values from a `column_type` string like
/// `enum('a','b','c')`.
fn parse_mysql_enum_values(column_type: &str) -> Vec<String> {
    let s = column_type.trim();
    if let (Some(start), Some(end)) = (s.find('('), s.rfind(')')) {
        let inner = &s[start + 1..end];
        return inner
            .split(',')
            .map(|v| v.trim().trim_matches('\'').to_string())
            .collect();
    }
    Vec::new()
}

fn decode_mysql_value(row: &MySqlRow, idx: usize, data_type: &DataType) -> Result<Value> {
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
        DataType::Json | DataType::Jsonb => get!(serde_json::Value, Value::Json),
        DataType::Binary => get!(Vec<u8>, Value::Bytes),
        DataType::Array(_) | DataType::Uuid | DataType::Enum(_) | DataType::Xml | DataType::Inet
        | DataType::MacAddr | DataType::Interval | DataType::Char | DataType::VarChar
        | DataType::Text | DataType::Unknown(_) => {
            get!(String, |v: String| Value::String(v.into()))
        }
    }
}

fn decode_err(row: &MySqlRow, idx: usize, e: sqlx::Error) -> SubsetError {
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

fn row_to_dynamic(row: &MySqlRow, table: &Table) -> Result<Row> {
    let mut out = Row::new();
    for (idx, (name, col)) in table.columns.iter().enumerate() {
        out.insert(name.clone(), decode_mysql_value(row, idx, &col.data_type)?);
    }
    Ok(out)
}

fn select_columns_sql(driver: &MySqlDriver, table: &Table) -> String {
    table
        .columns
        .keys()
        .map(|c| driver.quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Driver for MySqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn introspect(&self, schemas: &[String]) -> Result<DatabaseSchema> {
        let mut schema = DatabaseSchema::new(DatabaseType::MySQL, self.database_name.clone());
        let schema_names: Vec<String> = if schemas.is_empty() {
            vec![self.database_name.clone()]
        } else {
            schemas.to_vec()
        };

        for schema_name in &schema_names {
            let mut tables = self.introspect_tables(schema_name).await?;
            self.introspect_columns(schema_name, &mut tables).await?;
            self.introspect_primary_keys(&mut tables).await?;
            self.introspect_foreign_keys(&mut tables).await?;
            for table in tables.values() {
                schema.tables.insert(table.qualified_name(), table.clone());
            }
        }
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
                            let span = (hi - lo + 1).max(1);
                            if span > (k * 3).max(50) {
                                return self.sample_numeric_pk(table, &cols, &from, &pk.columns[0], lo, hi, k).await;
                            }
                        }
                    }
                }
            }
        }

        let sql = format!("SELECT {cols} FROM {from} ORDER BY RAND() LIMIT {k}");
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
            .map(|(c, v)| format!("{c} = {}", v.to_sql_literal(&DatabaseType::MySQL)))
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
            .map(|(c, v)| format!("{c} = {}", v.to_sql_literal(&DatabaseType::MySQL)))
            .collect();
        let sql = format!(
            "SELECT {cols} FROM {from} WHERE {} ORDER BY RAND() LIMIT {cap}",
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
        let sql = build_insert_sql(self, table, rows, &DatabaseType::MySQL);
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
        if !column.is_auto_increment {
            return Ok(());
        }
        let ident = self.quote_ident(&table.name);
        let max_sql = format!("SELECT COALESCE(MAX({}), 0) AS m FROM {ident}", self.quote_ident(col));
        let row = match sqlx::query(&max_sql).fetch_one(&self.pool).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(table = %table.name, error = %e, "sequence advance failed, continuing");
                return Ok(());
            }
        };
        let max_val: i64 = row.get("m");
        let alter_sql = format!("ALTER TABLE {ident} AUTO_INCREMENT = {}", max_val + 1);
        if let Err(e) = sqlx::query(&alter_sql).execute(&self.pool).await {
            tracing::warn!(table = %table.name, error = %e, "sequence advance failed, continuing");
        }
        Ok(())
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enum_values() {
        let values = parse_mysql_enum_values("enum('a','b','c')");
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_set_values() {
        let values = parse_mysql_enum_values("set('x','y')");
        assert_eq!(values, vec!["x", "y"]);
    }
}
