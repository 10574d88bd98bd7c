//! Primary backend: pooled SQL connection (SQLite or Postgres)
//!
//! Every call acquires one pooled connection and releases it when the
//! `PoolConnection` guard drops, on success and failure alike.
//!
//! Postgres rows are returned through `row_to_json` so that any column type
//! decodes as JSON text; SQLite rows are decoded column by column from their
//! dynamic storage class.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::postgres::PgRow;
use sqlx::query::Query;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Database, Encode, Row, Type, ValueRef};
use tracing::debug;

use super::backend::{
    Backend, BackendFailure, BackendKind, ColumnInfo, FailureKind, RawRow, RowSet, RowShape,
    SchemaProbe,
};
use super::descriptor::{
    is_valid_identifier, Direction, FilterValue, FunctionCall, Operator, QueryDescriptor,
};
use super::{Dialect, SqlPool};

/// Value bound to a statement placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bind {
    Text(String),
    Int(i64),
}

/// Rendered SQL plus its bind values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Bind>,
}

struct StatementBuilder {
    dialect: Dialect,
    binds: Vec<Bind>,
}

impl StatementBuilder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            binds: Vec::new(),
        }
    }

    /// Register a bind value and return its placeholder
    fn bind(&mut self, value: Bind) -> String {
        self.binds.push(value);
        self.dialect.placeholder(self.binds.len())
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            binds: self.binds,
        }
    }
}

fn quote(ident: &str) -> Result<String, String> {
    if is_valid_identifier(ident) {
        Ok(format!("\"{}\"", ident))
    } else {
        Err(format!("invalid identifier '{}'", ident))
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Column expression compared against text binds
///
/// Postgres will not compare e.g. an integer or uuid column with a text
/// parameter, so the column is cast; SQLite applies column affinity itself.
fn text_column(dialect: Dialect, column: &str) -> String {
    match dialect {
        Dialect::Postgres => format!("CAST({} AS TEXT)", column),
        Dialect::Sqlite => column.to_string(),
    }
}

fn render_predicates(
    builder: &mut StatementBuilder,
    query: &QueryDescriptor,
    qualifier: &str,
) -> Result<Vec<String>, String> {
    let dialect = builder.dialect;
    let mut clauses = Vec::with_capacity(query.predicates.len());

    for predicate in &query.predicates {
        let column = format!("{}{}", qualifier, quote(&predicate.column)?);
        let clause = match (&predicate.op, &predicate.value) {
            (Operator::Eq, FilterValue::Text(v)) => {
                let ph = builder.bind(Bind::Text(v.clone()));
                format!("{} = {}", text_column(dialect, &column), ph)
            }
            (Operator::Eq, FilterValue::Int(v)) => {
                let ph = builder.bind(Bind::Int(*v));
                format!("{} = {}", column, ph)
            }
            (Operator::Contains, FilterValue::Text(v)) => {
                let ph = builder.bind(Bind::Text(like_pattern(v)));
                format!(
                    "LOWER({}) LIKE LOWER({}) ESCAPE '\\'",
                    text_column(dialect, &column),
                    ph
                )
            }
            (Operator::In, FilterValue::List(values)) => {
                if values.is_empty() {
                    "1 = 0".to_string()
                } else {
                    let placeholders: Vec<String> = values
                        .iter()
                        .map(|v| builder.bind(Bind::Text(v.clone())))
                        .collect();
                    format!(
                        "{} IN ({})",
                        text_column(dialect, &column),
                        placeholders.join(", ")
                    )
                }
            }
            (op, value) => {
                return Err(format!(
                    "operator {:?} cannot take value {:?} on column '{}'",
                    op, value, predicate.column
                ))
            }
        };
        clauses.push(clause);
    }

    Ok(clauses)
}

fn render_order(query: &QueryDescriptor, qualifier: &str) -> Result<String, String> {
    if query.order.is_empty() {
        return Ok(String::new());
    }
    let terms = query
        .order
        .iter()
        .map(|o| {
            let dir = match o.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            Ok(format!("{}{} {} NULLS LAST", qualifier, quote(&o.column)?, dir))
        })
        .collect::<Result<Vec<_>, String>>()?;
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}

/// Append ascending tie-break terms to a rendered ORDER BY clause
fn with_tiebreak(order: String, columns: &[String]) -> String {
    let terms: Vec<String> = columns.iter().map(|c| format!("{} ASC", c)).collect();
    if order.is_empty() {
        format!(" ORDER BY {}", terms.join(", "))
    } else {
        format!("{}, {}", order, terms.join(", "))
    }
}

fn render_paging(dialect: Dialect, query: &QueryDescriptor) -> String {
    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
        (Some(limit), None) => format!(" LIMIT {}", limit),
        (None, Some(offset)) => match dialect {
            Dialect::Sqlite => format!(" LIMIT -1 OFFSET {}", offset),
            Dialect::Postgres => format!(" OFFSET {}", offset),
        },
        (None, None) => String::new(),
    }
}

/// Projected columns, widened so ordering and join keys stay addressable
fn projection(query: &QueryDescriptor) -> Result<String, String> {
    if query.columns.is_empty() {
        return Ok("*".to_string());
    }
    let mut columns = query.columns.clone();
    let mut required: Vec<&str> = query.order.iter().map(|o| o.column.as_str()).collect();
    if query.join.is_some() {
        required.push("id");
    }
    for column in required {
        if !columns.iter().any(|c| c == column) {
            columns.push(column.to_string());
        }
    }
    Ok(columns
        .iter()
        .map(|c| quote(c))
        .collect::<Result<Vec<_>, _>>()?
        .join(", "))
}

/// Render a select for the given dialect
///
/// With a join, paging applies to the base table before the relation is
/// joined, so `LIMIT 10` still means ten entities.
pub fn render_select(dialect: Dialect, query: &QueryDescriptor) -> Result<Statement, String> {
    let mut builder = StatementBuilder::new(dialect);

    let mut sql = format!("SELECT {} FROM {}", projection(query)?, quote(&query.table)?);
    let clauses = render_predicates(&mut builder, query, "")?;
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&render_order(query, "")?);
    sql.push_str(&render_paging(dialect, query));

    let mut outer_order = render_order(query, "q.")?;
    if let Some(join) = &query.join {
        let prefix = join.flat_prefix();
        let mut columns = vec!["b.*".to_string()];
        for column in &join.target_columns {
            columns.push(format!("t.{} AS {}", quote(column)?, quote(&format!("{}{}", prefix, column))?));
        }
        for column in &join.edge_columns {
            columns.push(format!("j.{} AS {}", quote(column)?, quote(&format!("{}{}", prefix, column))?));
        }
        sql = format!(
            "SELECT {} FROM ({}) AS b LEFT JOIN {} AS j ON j.{} = b.\"id\" LEFT JOIN {} AS t ON t.\"id\" = j.{}{}",
            columns.join(", "),
            sql,
            quote(&join.through)?,
            quote(&join.local_key)?,
            quote(&join.target)?,
            quote(&join.target_key)?,
            with_tiebreak(
                render_order(query, "b.")?,
                &["b.\"id\"".to_string(), format!("j.{}", quote(&join.target_key)?)],
            ),
        );
        let mut tiebreak = vec!["q.\"id\"".to_string()];
        if join.target_columns.iter().any(|c| c == "id") {
            tiebreak.push(format!("q.{}", quote(&format!("{}id", prefix))?));
        }
        outer_order = with_tiebreak(outer_order, &tiebreak);
    }

    if dialect == Dialect::Postgres {
        sql = format!(
            "SELECT CAST(row_to_json(q) AS TEXT) AS row_json FROM ({}) AS q{}",
            sql, outer_order
        );
    }

    Ok(builder.finish(sql))
}

/// Quote a literal for a function argument
///
/// Postgres resolves an untyped literal against the function signature,
/// which a typed text parameter would not.
fn literal(value: &FilterValue) -> Result<String, String> {
    match value {
        FilterValue::Text(s) => {
            if s.contains('\0') {
                return Err("NUL byte in function argument".to_string());
            }
            Ok(format!("'{}'", s.replace('\'', "''")))
        }
        FilterValue::Int(i) => Ok(i.to_string()),
        FilterValue::List(_) => Err("list arguments are not supported".to_string()),
    }
}

/// Render a set-returning function call (Postgres only)
pub fn render_call(dialect: Dialect, call: &FunctionCall) -> Result<Statement, String> {
    if dialect == Dialect::Sqlite {
        return Err("SQLite has no server-side functions".to_string());
    }
    let args = call
        .args
        .iter()
        .map(|(name, value)| Ok(format!("{} => {}", quote(name)?, literal(value)?)))
        .collect::<Result<Vec<_>, String>>()?;
    let sql = format!(
        "SELECT CAST(row_to_json(f) AS TEXT) AS row_json FROM {}({}) AS f",
        quote(&call.name)?,
        args.join(", ")
    );
    Ok(Statement {
        sql,
        binds: Vec::new(),
    })
}

fn bind_all<'q, DB>(
    mut query: Query<'q, DB, <DB as Database>::Arguments<'q>>,
    binds: &[Bind],
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    String: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
{
    for bind in binds {
        query = match bind {
            Bind::Text(s) => query.bind(s.clone()),
            Bind::Int(i) => query.bind(*i),
        };
    }
    query
}

/// Decode a SQLite column from its storage class
fn sqlite_value(row: &SqliteRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Err(_) => return Value::Null,
        Ok(_) => {}
    }
    row.try_get::<i64, _>(index)
        .ok()
        .map(|v| json!(v))
        .or_else(|| row.try_get::<f64, _>(index).ok().map(|v| json!(v)))
        .or_else(|| row.try_get::<String, _>(index).ok().map(Value::String))
        .unwrap_or(Value::Null)
}

fn sqlite_row_to_map(row: &SqliteRow) -> Result<RawRow, String> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), sqlite_value(row, index));
    }
    Ok(map)
}

fn pg_row_to_map(row: &PgRow) -> Result<RawRow, String> {
    let text: String = row.try_get(0).map_err(|e| e.to_string())?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object row, got {}", other)),
        Err(e) => Err(e.to_string()),
    }
}

fn classify(err: &sqlx::Error) -> FailureKind {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => FailureKind::Connection,
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. } => FailureKind::Decode,
        _ => FailureKind::Query,
    }
}

/// SQL implementation of [`Backend`] and [`SchemaProbe`]
#[derive(Clone)]
pub struct SqlBackend {
    pool: SqlPool,
}

impl SqlBackend {
    pub fn new(pool: SqlPool) -> Self {
        Self { pool }
    }

    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    fn failure(kind: FailureKind, message: impl Into<String>) -> BackendFailure {
        BackendFailure::new(BackendKind::Primary, kind, message)
    }

    fn sqlx_failure(err: sqlx::Error) -> BackendFailure {
        Self::failure(classify(&err), err.to_string())
    }

    /// Run `statement` on one pooled connection and decode every row
    async fn run<T: Send>(
        &self,
        statement: &Statement,
        from_sqlite: fn(&SqliteRow) -> Result<T, String>,
        from_pg: fn(&PgRow) -> Result<T, String>,
    ) -> Result<Vec<T>, BackendFailure> {
        debug!(sql = %statement.sql, binds = statement.binds.len(), "Executing primary query");

        let decoded = match &self.pool {
            SqlPool::Sqlite(pool) => {
                let mut conn = pool.acquire().await.map_err(Self::sqlx_failure)?;
                let rows = bind_all(sqlx::query::<sqlx::Sqlite>(&statement.sql), &statement.binds)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(Self::sqlx_failure)?;
                rows.iter().map(from_sqlite).collect::<Result<Vec<_>, _>>()
            }
            SqlPool::Postgres(pool) => {
                let mut conn = pool.acquire().await.map_err(Self::sqlx_failure)?;
                let rows = bind_all(sqlx::query::<sqlx::Postgres>(&statement.sql), &statement.binds)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(Self::sqlx_failure)?;
                rows.iter().map(from_pg).collect::<Result<Vec<_>, _>>()
            }
        };

        decoded.map_err(|e| Self::failure(FailureKind::Decode, e))
    }

    async fn count(&self, statement: Statement) -> Result<i64, BackendFailure> {
        let counts = self
            .run(
                &statement,
                |row| row.try_get::<i64, _>(0).map_err(|e| e.to_string()),
                |row| row.try_get::<i64, _>(0).map_err(|e| e.to_string()),
            )
            .await?;
        Ok(counts.into_iter().next().unwrap_or(0))
    }

    fn statement(&self, sql: &str, args: &[&str]) -> Statement {
        let mut builder = StatementBuilder::new(self.dialect());
        let placeholders: Vec<String> = args
            .iter()
            .map(|a| builder.bind(Bind::Text(a.to_string())))
            .collect();
        let mut rendered = sql.to_string();
        for (i, ph) in placeholders.iter().enumerate() {
            rendered = rendered.replacen(&format!("{{{}}}", i), ph, 1);
        }
        builder.finish(rendered)
    }
}

#[async_trait]
impl Backend for SqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Primary
    }

    async fn fetch(&self, query: &QueryDescriptor) -> Result<RowSet, BackendFailure> {
        let statement = render_select(self.dialect(), query)
            .map_err(|e| Self::failure(FailureKind::Query, e))?;
        let rows = self.run(&statement, sqlite_row_to_map, pg_row_to_map).await?;
        let shape = match &query.join {
            Some(join) => RowShape::FlatJoined {
                prefix: join.flat_prefix(),
            },
            None => RowShape::Flat,
        };
        Ok(RowSet::new(BackendKind::Primary, shape, rows))
    }

    async fn call(&self, call: &FunctionCall) -> Result<RowSet, BackendFailure> {
        let statement = render_call(self.dialect(), call)
            .map_err(|e| Self::failure(FailureKind::Unsupported, e))?;
        let rows = self.run(&statement, sqlite_row_to_map, pg_row_to_map).await?;
        Ok(RowSet::new(BackendKind::Primary, RowShape::Flat, rows))
    }
}

#[async_trait]
impl SchemaProbe for SqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Primary
    }

    async fn table_exists(&self, table: &str) -> Result<bool, BackendFailure> {
        let sql = match self.dialect() {
            Dialect::Sqlite => {
                "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = {0}"
            }
            Dialect::Postgres => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = {0}"
            }
        };
        Ok(self.count(self.statement(sql, &[table])).await? > 0)
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, BackendFailure> {
        let sql = match self.dialect() {
            Dialect::Sqlite => "SELECT COUNT(*) FROM pragma_table_info({0}) WHERE name = {1}",
            Dialect::Postgres => {
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = {0} AND column_name = {1}"
            }
        };
        Ok(self.count(self.statement(sql, &[table, column])).await? > 0)
    }

    async fn function_exists(&self, name: &str) -> Result<bool, BackendFailure> {
        let sql = match self.dialect() {
            Dialect::Sqlite => "SELECT COUNT(*) FROM pragma_function_list WHERE name = {0}",
            Dialect::Postgres => {
                "SELECT COUNT(*) FROM pg_catalog.pg_proc p \
                 JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace \
                 WHERE p.proname = {0} AND n.nspname = current_schema()"
            }
        };
        Ok(self.count(self.statement(sql, &[name])).await? > 0)
    }

    async fn list_tables(&self) -> Result<Vec<String>, BackendFailure> {
        let sql = match self.dialect() {
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name ASC"
            }
            Dialect::Postgres => {
                "SELECT CAST(table_name AS TEXT) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name ASC"
            }
        };
        self.run(
            &self.statement(sql, &[]),
            |row| row.try_get::<String, _>(0).map_err(|e| e.to_string()),
            |row| row.try_get::<String, _>(0).map_err(|e| e.to_string()),
        )
        .await
    }

    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, BackendFailure> {
        let sql = match self.dialect() {
            Dialect::Sqlite => "SELECT name, type FROM pragma_table_info({0}) ORDER BY cid ASC",
            Dialect::Postgres => {
                "SELECT CAST(column_name AS TEXT), CAST(data_type AS TEXT) \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = {0} \
                 ORDER BY ordinal_position ASC"
            }
        };
        fn sqlite_column(row: &SqliteRow) -> Result<ColumnInfo, String> {
            Ok(ColumnInfo {
                name: row.try_get(0).map_err(|e: sqlx::Error| e.to_string())?,
                type_name: row.try_get::<Option<String>, _>(1).map_err(|e| e.to_string())?.unwrap_or_default(),
            })
        }
        fn pg_column(row: &PgRow) -> Result<ColumnInfo, String> {
            Ok(ColumnInfo {
                name: row.try_get(0).map_err(|e: sqlx::Error| e.to_string())?,
                type_name: row.try_get::<Option<String>, _>(1).map_err(|e| e.to_string())?.unwrap_or_default(),
            })
        }
        self.run(&self.statement(sql, &[table]), sqlite_column, pg_column).await
    }
}
