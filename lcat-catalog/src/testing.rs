//! In-memory backend for unit tests
//!
//! Evaluates query descriptors over seeded tables: equality, substring and
//! list filters, ordering with nulls last, paging, and join-table embedding
//! in the flat-joined (primary) or nested (secondary) shape.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

use crate::db::backend::{
    value_as_id, Backend, BackendFailure, BackendKind, ColumnInfo, FailureKind, RawRow, RowSet,
    RowShape, SchemaProbe,
};
use crate::db::descriptor::{Direction, FilterValue, FunctionCall, Operator, QueryDescriptor};
use crate::db::rest::EMBED_MEMBER_FIELD;

struct Table {
    columns: Vec<String>,
    rows: Vec<RawRow>,
}

pub struct MemoryBackend {
    kind: BackendKind,
    tables: BTreeMap<String, Table>,
    functions: BTreeMap<String, Vec<RawRow>>,
    failure: Option<FailureKind>,
    failing_tables: HashSet<String>,
    probe_failure: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    probes: AtomicUsize,
    log: Mutex<Vec<QueryDescriptor>>,
}

fn to_row(value: Value) -> RawRow {
    match value {
        Value::Object(map) => map,
        other => panic!("test row must be an object, got {}", other),
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    value.and_then(value_as_id)
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => text_of(Some(x)).cmp(&text_of(Some(y))),
    }
}

impl MemoryBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            tables: BTreeMap::new(),
            functions: BTreeMap::new(),
            failure: None,
            failing_tables: HashSet::new(),
            probe_failure: false,
            delay: None,
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn primary() -> Self {
        Self::new(BackendKind::Primary)
    }

    pub fn secondary() -> Self {
        Self::new(BackendKind::Secondary)
    }

    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn table(mut self, name: &str, columns: &[&str], rows: Vec<Value>) -> Self {
        self.tables.insert(
            name.to_string(),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: rows.into_iter().map(to_row).collect(),
            },
        );
        self
    }

    /// Register a set-returning function; rows are returned for any arguments
    pub fn function(mut self, name: &str, rows: Vec<Value>) -> Self {
        self.functions
            .insert(name.to_string(), rows.into_iter().map(to_row).collect());
        self
    }

    /// Every fetch and call fails with `kind`
    pub fn failing(mut self, kind: FailureKind) -> Self {
        self.failure = Some(kind);
        self
    }

    /// Fetches against `table` fail with a query error
    pub fn failing_table(mut self, table: &str) -> Self {
        self.failing_tables.insert(table.to_string());
        self
    }

    /// Metadata probes fail instead of answering
    pub fn probe_failing(mut self) -> Self {
        self.probe_failure = true;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of fetches and calls served (or refused)
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(AtomicOrdering::SeqCst)
    }

    /// Descriptors fetched against `table`, in order
    pub fn fetches_of(&self, table: &str) -> Vec<QueryDescriptor> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.table == table)
            .cloned()
            .collect()
    }

    fn failure(&self, kind: FailureKind, message: &str) -> BackendFailure {
        BackendFailure::new(self.kind, kind, message)
    }

    fn matches(row: &RawRow, query: &QueryDescriptor) -> bool {
        query.predicates.iter().all(|p| {
            let actual = text_of(row.get(&p.column));
            match (&p.op, &p.value) {
                (Operator::Eq, FilterValue::Text(v)) => actual.as_deref() == Some(v.as_str()),
                (Operator::Eq, FilterValue::Int(v)) => actual == Some(v.to_string()),
                (Operator::Contains, FilterValue::Text(v)) => actual
                    .map(|a| a.to_lowercase().contains(&v.to_lowercase()))
                    .unwrap_or(false),
                (Operator::In, FilterValue::List(values)) => {
                    actual.map(|a| values.contains(&a)).unwrap_or(false)
                }
                _ => false,
            }
        })
    }

    fn select(&self, query: &QueryDescriptor) -> Result<RowSet, BackendFailure> {
        let table = self.tables.get(&query.table).ok_or_else(|| {
            self.failure(
                FailureKind::Query,
                &format!("relation \"{}\" does not exist", query.table),
            )
        })?;
        for column in query.predicates.iter().map(|p| &p.column).chain(query.order.iter().map(|o| &o.column)) {
            if !table.columns.contains(column) {
                return Err(self.failure(
                    FailureKind::Query,
                    &format!("column \"{}\" does not exist", column),
                ));
            }
        }

        let mut rows: Vec<RawRow> = table
            .rows
            .iter()
            .filter(|row| Self::matches(row, query))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            for term in &query.order {
                let ord = compare(a.get(&term.column), b.get(&term.column));
                let ord = match (term.direction, a.get(&term.column), b.get(&term.column)) {
                    (Direction::Desc, Some(x), Some(y)) if !x.is_null() && !y.is_null() => ord.reverse(),
                    _ => ord,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let rows: Vec<RawRow> = rows.into_iter().skip(offset).take(limit).collect();

        let Some(join) = &query.join else {
            return Ok(RowSet::new(self.kind, RowShape::Flat, rows));
        };

        let edges = self.tables.get(&join.through).map(|t| t.rows.as_slice()).unwrap_or(&[]);
        let targets = self.tables.get(&join.target).map(|t| t.rows.as_slice()).unwrap_or(&[]);
        let project = |target: &RawRow| -> RawRow {
            if join.target_columns.is_empty() {
                return target.clone();
            }
            join.target_columns
                .iter()
                .map(|c| (c.clone(), target.get(c).cloned().unwrap_or(Value::Null)))
                .collect()
        };

        match self.kind {
            BackendKind::Primary => {
                let prefix = join.flat_prefix();
                let mut joined = Vec::new();
                for base in rows {
                    let base_id = text_of(base.get("id"));
                    let mut matched = false;
                    for edge in edges.iter().filter(|e| text_of(e.get(&join.local_key)) == base_id) {
                        let target_id = text_of(edge.get(&join.target_key));
                        let target = targets.iter().find(|t| text_of(t.get("id")) == target_id);
                        let mut row = base.clone();
                        for column in &join.target_columns {
                            let value = target.and_then(|t| t.get(column)).cloned().unwrap_or(Value::Null);
                            row.insert(format!("{}{}", prefix, column), value);
                        }
                        for column in &join.edge_columns {
                            row.insert(
                                format!("{}{}", prefix, column),
                                edge.get(column).cloned().unwrap_or(Value::Null),
                            );
                        }
                        joined.push(row);
                        matched = true;
                    }
                    if !matched {
                        let mut row = base;
                        for column in join.target_columns.iter().chain(&join.edge_columns) {
                            row.insert(format!("{}{}", prefix, column), Value::Null);
                        }
                        joined.push(row);
                    }
                }
                Ok(RowSet::new(self.kind, RowShape::FlatJoined { prefix }, joined))
            }
            BackendKind::Secondary => {
                let nested = rows
                    .into_iter()
                    .map(|mut base| {
                        let base_id = text_of(base.get("id"));
                        let members: Vec<Value> = edges
                            .iter()
                            .filter(|e| text_of(e.get(&join.local_key)) == base_id)
                            .map(|edge| {
                                let mut element = Map::new();
                                for column in &join.edge_columns {
                                    element.insert(
                                        column.clone(),
                                        edge.get(column).cloned().unwrap_or(Value::Null),
                                    );
                                }
                                let target_id = text_of(edge.get(&join.target_key));
                                let member = targets
                                    .iter()
                                    .find(|t| text_of(t.get("id")) == target_id)
                                    .map(|t| Value::Object(project(t)))
                                    .unwrap_or(Value::Null);
                                element.insert(EMBED_MEMBER_FIELD.to_string(), member);
                                Value::Object(element)
                            })
                            .collect();
                        base.insert(join.alias.clone(), Value::Array(members));
                        base
                    })
                    .collect();
                Ok(RowSet::new(
                    self.kind,
                    RowShape::Nested {
                        field: join.alias.clone(),
                    },
                    nested,
                ))
            }
        }
    }

    async fn enter(&self) -> Result<(), BackendFailure> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure {
            Some(kind) => Err(self.failure(kind, "scripted failure")),
            None => Ok(()),
        }
    }

    fn probe(&self) -> Result<(), BackendFailure> {
        self.probes.fetch_add(1, AtomicOrdering::SeqCst);
        if self.probe_failure || self.failure.is_some() {
            Err(self.failure(FailureKind::Connection, "metadata unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn fetch(&self, query: &QueryDescriptor) -> Result<RowSet, BackendFailure> {
        self.log.lock().unwrap().push(query.clone());
        self.enter().await?;
        if self.failing_tables.contains(&query.table) {
            return Err(self.failure(FailureKind::Query, "scripted table failure"));
        }
        self.select(query)
    }

    async fn call(&self, call: &FunctionCall) -> Result<RowSet, BackendFailure> {
        self.enter().await?;
        match self.functions.get(&call.name) {
            Some(rows) => Ok(RowSet::new(self.kind, RowShape::Flat, rows.clone())),
            None => Err(self.failure(
                FailureKind::Query,
                &format!("function {} does not exist", call.name),
            )),
        }
    }
}

#[async_trait]
impl SchemaProbe for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn table_exists(&self, table: &str) -> Result<bool, BackendFailure> {
        self.probe()?;
        Ok(self.tables.contains_key(table))
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, BackendFailure> {
        self.probe()?;
        Ok(self
            .tables
            .get(table)
            .map(|t| t.columns.iter().any(|c| c == column))
            .unwrap_or(false))
    }

    async fn function_exists(&self, name: &str) -> Result<bool, BackendFailure> {
        self.probe()?;
        Ok(self.functions.contains_key(name))
    }

    async fn list_tables(&self) -> Result<Vec<String>, BackendFailure> {
        self.probe()?;
        Ok(self.tables.keys().cloned().collect())
    }

    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, BackendFailure> {
        self.probe()?;
        let table = self
            .tables
            .get(table)
            .ok_or_else(|| self.failure(FailureKind::Query, "no such table"))?;
        Ok(table
            .columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.clone(),
                type_name: "TEXT".to_string(),
            })
            .collect())
    }
}
