use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level representation of a database schema, as introspected from one
/// side of a copy (source or target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub database_type: DatabaseType,
    pub database_name: String,
    pub tables: IndexMap<String, Table>,
    pub enums: IndexMap<String, Vec<String>>,
}

impl DatabaseSchema {
    pub fn new(database_type: DatabaseType, database_name: String) -> Self {
        Self {
            database_type,
            database_name,
            tables: IndexMap::new(),
            enums: IndexMap::new(),
        }
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn foreign_key_count(&self) -> usize {
        self.tables.values().map(|t| t.foreign_keys.len()).sum()
    }

    /// Look up a table by bare name, ignoring schema qualification. Tables
    /// are keyed by qualified name internally but most config/CLI input is
    /// bare. Intended for user-supplied names (`--force`, `--full-table`,
    /// config `tables`/constraints) that carry no schema of their own; FK
    /// traversal must go through [`DatabaseSchema::resolve_fk_target`]
    /// instead, since this bare-name fallback can collide when two schemas
    /// share a table name (§8 scenario 6).
    pub fn find_table(&self, name: &str) -> Option<&Table> {
        if let Some(t) = self.tables.get(name) {
            return Some(t);
        }
        self.tables.values().find(|t| t.name == name)
    }

    /// Resolve the table a foreign key edge refers to, matching on schema
    /// as well as name when the edge declares one. A bare name-only match
    /// (as `find_table` does) would silently resolve to the wrong parent
    /// whenever two schemas contain a same-named table.
    pub fn resolve_fk_target(&self, fk: &ForeignKey) -> Option<&Table> {
        self.tables.values().find(|t| fk.targets(t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseType::PostgreSQL => write!(f, "PostgreSQL"),
            DatabaseType::MySQL => write!(f, "MySQL"),
            DatabaseType::SQLite => write!(f, "SQLite"),
        }
    }
}

/// A database table together with the bookkeeping the coordinator needs to
/// drive copying: source/target row counts and the prioritization flag from
/// §4.1 of the design (full-table or forced-row descendant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub schema_name: Option<String>,
    pub columns: IndexMap<String, Column>,
    pub primary_key: Option<PrimaryKey>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Whether this table was selected by the include/exclude pattern rule.
    /// Unselected tables remain visible for FK traversal but are never
    /// inserted into.
    pub selected: bool,
    /// `--full-table` or a descendant of a forced row: bypasses per-parent
    /// child caps and the target-count cap.
    pub prioritized: bool,
    pub source_row_count: i64,
    pub target_row_count: i64,
}

impl Table {
    pub fn new(name: String) -> Self {
        Self {
            name,
            schema_name: None,
            columns: IndexMap::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            selected: true,
            prioritized: false,
            source_row_count: 0,
            target_row_count: 0,
        }
    }

    /// Completeness score per GLOSSARY: `copied_count / target_count`, with
    /// `target_count == 0` scored as +infinity so the table is never chosen
    /// by the coordinator's lowest-score rule (§9 open question c).
    pub fn completeness(&self, copied_count: i64) -> f64 {
        if self.target_row_count == 0 {
            return f64::INFINITY;
        }
        if self.prioritized {
            // Clamp so a prioritized table always looks less-complete than
            // a non-prioritized table that has already hit its target,
            // keeping priority work preferred (§4.1).
            return (copied_count as f64 / self.target_row_count as f64).min(0.999_999);
        }
        copied_count as f64 / self.target_row_count as f64
    }

    pub fn qualified_name(&self) -> String {
        match &self.schema_name {
            Some(s) => format!("{}.{}", s, self.name),
            None => self.name.clone(),
        }
    }
}

/// Represents a single column in a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub raw_type: String,
    pub nullable: bool,
    pub has_default: bool,
    pub is_auto_increment: bool,
    pub max_length: Option<u32>,
    pub numeric_precision: Option<u32>,
    pub numeric_scale: Option<u32>,
    pub enum_values: Option<Vec<String>>,
    pub ordinal_position: u32,
}

impl Column {
    pub fn new(name: String, data_type: DataType, raw_type: String) -> Self {
        Self {
            name,
            data_type,
            raw_type,
            nullable: true,
            has_default: false,
            is_auto_increment: false,
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            enum_values: None,
            ordinal_position: 0,
        }
    }

    /// Coarse semantic tag used by drivers to round-trip values (§3 of the
    /// design doc), never for value synthesis.
    pub fn semantic_category(&self) -> SemanticCategory {
        match &self.data_type {
            DataType::Array(inner) if matches!(**inner, DataType::Enum(_)) => {
                SemanticCategory::ArrayOfEnumerated
            }
            DataType::Array(_) => SemanticCategory::Other,
            DataType::Enum(_) => SemanticCategory::Enumerated,
            t if t.is_numeric() => SemanticCategory::Numeric,
            t if t.is_string() => SemanticCategory::Textual,
            t if t.is_temporal() => SemanticCategory::Temporal,
            DataType::Boolean => SemanticCategory::Boolean,
            DataType::Binary => SemanticCategory::Binary,
            _ => SemanticCategory::Other,
        }
    }
}

/// Coarse column category, used only so drivers know how to round-trip a
/// value (NULLs, arrays, enumerated types), never for generating one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SemanticCategory {
    Numeric,
    Textual,
    Boolean,
    Temporal,
    Binary,
    Enumerated,
    /// Array whose element type is itself an enum. Kept distinct from a
    /// plain array rather than collapsed to "array of string" — some
    /// drivers require an explicit cast on insert (§9 known gotcha).
    ArrayOfEnumerated,
    Other,
}

/// Normalized data type enum covering all supported databases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Numeric,
    Char,
    VarChar,
    Text,
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Jsonb,
    Binary,
    Array(Box<DataType>),
    Enum(String),
    Inet,
    MacAddr,
    Xml,
    Money,
    Interval,
    Serial,
    BigSerial,
    Unknown(String),
}

impl DataType {
    /// Parse a raw SQL type string into a normalized DataType.
    pub fn from_raw(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        let normalized = normalized.as_str();

        if let Some(inner) = normalized.strip_suffix("[]") {
            return DataType::Array(Box::new(DataType::from_raw(inner)));
        }
        if let Some(inner) = normalized.strip_prefix('_') {
            if !inner.is_empty() {
                return DataType::Array(Box::new(DataType::from_raw(inner)));
            }
        }

        match normalized {
            "smallint" | "int2" | "smallserial" | "serial2" | "tinyint" => DataType::SmallInt,
            "integer" | "int" | "int4" | "mediumint" => DataType::Integer,
            "bigint" | "int8" => DataType::BigInt,
            "serial" | "serial4" => DataType::Serial,
            "bigserial" | "serial8" => DataType::BigSerial,

            "real" | "float4" | "float" => DataType::Float,
            "double precision" | "float8" | "double" => DataType::Double,

            s if s.starts_with("numeric") || s.starts_with("decimal") => DataType::Numeric,

            s if s.starts_with("character varying") || s.starts_with("varchar") => {
                DataType::VarChar
            }
            s if s.starts_with("char") || s.starts_with("character(") => DataType::Char,
            "text" | "tinytext" | "mediumtext" | "longtext" | "clob" => DataType::Text,

            "boolean" | "bool" | "bit" => DataType::Boolean,

            "date" => DataType::Date,
            "time" | "time without time zone" => DataType::Time,
            "timestamp" | "timestamp without time zone" | "datetime" => DataType::Timestamp,
            "timestamp with time zone" | "timestamptz" => DataType::TimestampTz,

            "uuid" => DataType::Uuid,

            "json" => DataType::Json,
            "jsonb" => DataType::Jsonb,

            "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
                DataType::Binary
            }

            "inet" | "cidr" => DataType::Inet,
            "macaddr" | "macaddr8" => DataType::MacAddr,

            "xml" => DataType::Xml,
            "money" => DataType::Money,
            "interval" => DataType::Interval,

            "user-defined" => DataType::Unknown("USER-DEFINED".to_string()),

            other => DataType::Unknown(other.to_string()),
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, DataType::Serial | DataType::BigSerial)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::SmallInt
                | DataType::Integer
                | DataType::BigInt
                | DataType::Float
                | DataType::Double
                | DataType::Numeric
                | DataType::Serial
                | DataType::BigSerial
                | DataType::Money
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Char | DataType::VarChar | DataType::Text)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            DataType::Date
                | DataType::Time
                | DataType::Timestamp
                | DataType::TimestampTz
                | DataType::Interval
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::SmallInt => write!(f, "smallint"),
            DataType::Integer => write!(f, "integer"),
            DataType::BigInt => write!(f, "bigint"),
            DataType::Float => write!(f, "real"),
            DataType::Double => write!(f, "double precision"),
            DataType::Numeric => write!(f, "numeric"),
            DataType::Char => write!(f, "char"),
            DataType::VarChar => write!(f, "varchar"),
            DataType::Text => write!(f, "text"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Date => write!(f, "date"),
            DataType::Time => write!(f, "time"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::TimestampTz => write!(f, "timestamptz"),
            DataType::Uuid => write!(f, "uuid"),
            DataType::Json => write!(f, "json"),
            DataType::Jsonb => write!(f, "jsonb"),
            DataType::Binary => write!(f, "bytea"),
            DataType::Array(inner) => write!(f, "{}[]", inner),
            DataType::Enum(name) => write!(f, "enum({})", name),
            DataType::Inet => write!(f, "inet"),
            DataType::MacAddr => write!(f, "macaddr"),
            DataType::Xml => write!(f, "xml"),
            DataType::Money => write!(f, "money"),
            DataType::Interval => write!(f, "interval"),
            DataType::Serial => write!(f, "serial"),
            DataType::BigSerial => write!(f, "bigserial"),
            DataType::Unknown(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub columns: Vec<String>,
    pub name: Option<String>,
}

/// A directed edge from child table to referred (parent) table. May cross
/// schemas (`referred_schema`). `is_logical` marks an edge that came from
/// user config rather than the database catalog — it carries the same
/// force as a real FK from here on (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub source_columns: Vec<String>,
    pub referred_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
    pub is_deferrable: bool,
    pub is_logical: bool,
}

impl ForeignKey {
    /// Whether this edge's referred side resolves to `table`: the table
    /// name must match, and when the edge declares a schema, that schema
    /// must match `table.schema_name` too. An edge with no declared schema
    /// (SQLite, or a config-supplied logical constraint with
    /// `referred_schema: null`) matches on name alone.
    pub fn targets(&self, table: &Table) -> bool {
        self.referenced_table == table.name
            && match &self.referred_schema {
                Some(s) => table.schema_name.as_deref() == Some(s.as_str()),
                None => true,
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    pub fn parse_action(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "CASCADE" => ForeignKeyAction::Cascade,
            "SET NULL" => ForeignKeyAction::SetNull,
            "SET DEFAULT" => ForeignKeyAction::SetDefault,
            "RESTRICT" => ForeignKeyAction::Restrict,
            _ => ForeignKeyAction::NoAction,
        }
    }
}

impl fmt::Display for ForeignKeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForeignKeyAction::NoAction => write!(f, "NO ACTION"),
            ForeignKeyAction::Restrict => write!(f, "RESTRICT"),
            ForeignKeyAction::Cascade => write!(f, "CASCADE"),
            ForeignKeyAction::SetNull => write!(f, "SET NULL"),
            ForeignKeyAction::SetDefault => write!(f, "SET DEFAULT"),
        }
    }
}
