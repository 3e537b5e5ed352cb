//! # Error Types
//!
//! Defines `SubsetError`, the unified error enum for every failure mode in
//! the subsetting pipeline. Every variant carries enough context (table,
//! column, PK value, SQL snippet) to debug immediately without digging
//! through logs.

use thiserror::Error;

/// All errors that can occur while subsetting a database.
#[derive(Error, Debug)]
pub enum SubsetError {
    #[error("Database connection failed: {message}\n  Connection string: {connection_hint}\n  Cause: {source}")]
    Connection {
        message: String,
        connection_hint: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Schema introspection failed on query '{query}': {source}")]
    Introspection {
        query: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("No database URL provided for {side}. subsetkit needs <source-url> and <target-url> positional arguments, e.g.:\n  subsetkit postgres://localhost/prod postgres://localhost/dev 0.05")]
    NoDatabaseUrl { side: String },

    #[error("Unsupported database scheme '{scheme}'. Supported: postgres://, mysql://, sqlite://")]
    UnsupportedDatabase { scheme: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unknown table '{table}' named in {context}")]
    UnknownTable { table: String, context: String },

    #[error("--force={table}:{pk} targets a composite primary key; forced rows only support single-column PKs (see design notes open question b)")]
    CompositeForceUnsupported { table: String, pk: String },

    #[error("Include/exclude pattern '{pattern}' matched no table")]
    PatternMatchedNothing { pattern: String },

    #[error("Table '{table}' is named in both --full-table and --exclude-table; exclusion is authoritative, treating this as a configuration error (see design notes open question a)")]
    PrioritizedAndExcluded { table: String },

    #[error("Target schema is missing column '{table}.{column}' present on the source")]
    SchemaMismatch { table: String, column: String },

    #[error("Forced row not found: {table}:{pk} does not exist in the source")]
    ForcedRowNotFound { table: String, pk: String },

    #[error("Insert failed on {table} row {row_index}: {message}\n  SQL: {sql_preview}\n  DB error: {source}")]
    InsertFailed {
        table: String,
        row_index: usize,
        message: String,
        sql_preview: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Logical foreign key in config references table '{table}', which has no primary key; PK-less tables cannot be referenced by a foreign key")]
    ReferencedTableHasNoPrimaryKey { table: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SubsetError>;
