//! Backend abstraction shared by the SQL store and the REST proxy

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use super::descriptor::{FunctionCall, QueryDescriptor};

/// One decoded row, keyed by column name
pub type RawRow = Map<String, Value>;

/// Which backend a query ran against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Pooled direct connection to the relational store
    Primary,
    /// Hosted REST proxy over the same tables
    Secondary,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Primary => f.write_str("primary"),
            BackendKind::Secondary => f.write_str("secondary"),
        }
    }
}

/// Classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Backend unreachable (connect error, pool exhausted, network)
    Connection,
    /// Backend reachable but rejected the query (syntax, missing relation, HTTP 4xx/5xx)
    Query,
    /// Call exceeded the configured timeout
    Timeout,
    /// Response could not be decoded into rows
    Decode,
    /// The backend cannot express this request
    Unsupported,
    /// The request was cancelled by the caller
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Connection => "connection",
            FailureKind::Query => "query",
            FailureKind::Timeout => "timeout",
            FailureKind::Decode => "decode",
            FailureKind::Unsupported => "unsupported",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Typed failure of a single backend call
#[derive(Debug, Clone, Error, Serialize)]
#[error("{backend} backend {kind} error: {message}")]
pub struct BackendFailure {
    pub backend: BackendKind,
    pub kind: FailureKind,
    pub message: String,
}

impl BackendFailure {
    pub fn new(backend: BackendKind, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            backend,
            kind,
            message: message.into(),
        }
    }

    /// Whether the other backend is worth asking after this failure
    pub fn should_try_other_backend(&self) -> bool {
        self.kind != FailureKind::Cancelled
    }
}

/// Declared layout of the rows a backend returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RowShape {
    /// One row per entity, no embedded relation
    Flat,
    /// One row per (entity, related member); member columns carry `prefix`
    FlatJoined { prefix: String },
    /// One row per entity with the relation embedded as an array under `field`
    Nested { field: String },
}

/// Rows plus the shape and backend they came from
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet {
    pub backend: BackendKind,
    pub shape: RowShape,
    pub rows: Vec<RawRow>,
}

impl RowSet {
    pub fn new(backend: BackendKind, shape: RowShape, rows: Vec<RawRow>) -> Self {
        Self { backend, shape, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Column metadata from introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// A store that can answer row queries and function calls
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Run a select described by `query`
    async fn fetch(&self, query: &QueryDescriptor) -> Result<RowSet, BackendFailure>;

    /// Invoke a server-side function returning rows
    async fn call(&self, call: &FunctionCall) -> Result<RowSet, BackendFailure>;
}

/// A store that can answer schema metadata questions
#[async_trait]
pub trait SchemaProbe: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn table_exists(&self, table: &str) -> Result<bool, BackendFailure>;

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, BackendFailure>;

    async fn function_exists(&self, name: &str) -> Result<bool, BackendFailure>;

    /// User tables, sorted by name
    async fn list_tables(&self) -> Result<Vec<String>, BackendFailure>;

    /// Columns of `table` in declaration order
    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, BackendFailure>;
}

/// Read a column as an identifier string (numbers are stringified)
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
