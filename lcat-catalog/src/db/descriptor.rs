//! Backend-agnostic query descriptions
//!
//! A [`QueryDescriptor`] names a table, predicates, ordering, paging and an
//! optional embedded relation. Each backend renders it into its own syntax
//! (SQL for the primary store, PostgREST parameters for the proxy).

use serde::Serialize;

/// Comparison operators understood by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Exact equality
    Eq,
    /// Case-insensitive substring match
    Contains,
    /// Membership in a list of values
    In,
}

/// Literal compared against a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    List(Vec<String>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

/// `column <op> value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Predicate {
    pub column: String,
    pub op: Operator,
    pub value: FilterValue,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

/// One ordering term; nulls always sort last
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// Many-to-many embedding through a join table
///
/// For `releases` embedding `artists` through `release_artists`:
/// `through = release_artists`, `local_key = release_id`,
/// `target_key = artist_id`, `target = artists`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinSpec {
    /// Name under which the related rows are returned
    pub alias: String,
    pub through: String,
    /// Column of `through` referencing the base table's `id`
    pub local_key: String,
    /// Column of `through` referencing the target table's `id`
    pub target_key: String,
    pub target: String,
    /// Target columns to project
    pub target_columns: Vec<String>,
    /// Columns of the join table itself to project (e.g. `role`)
    pub edge_columns: Vec<String>,
}

impl JoinSpec {
    /// Column prefix used when the relation is flattened into joined rows
    pub fn flat_prefix(&self) -> String {
        format!("{}__", self.alias)
    }
}

/// A read query against one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryDescriptor {
    pub table: String,
    /// Projected columns; empty means all columns
    pub columns: Vec<String>,
    pub predicates: Vec<Predicate>,
    pub order: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub join: Option<JoinSpec>,
}

impl QueryDescriptor {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            predicates: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            join: None,
        }
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, column: impl Into<String>, op: Operator, value: impl Into<FilterValue>) -> Self {
        self.predicates.push(Predicate {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filter(column, Operator::Eq, value)
    }

    pub fn contains(self, column: impl Into<String>, needle: impl Into<String>) -> Self {
        self.filter(column, Operator::Contains, FilterValue::Text(needle.into()))
    }

    pub fn any_of(self, column: impl Into<String>, values: Vec<String>) -> Self {
        self.filter(column, Operator::In, FilterValue::List(values))
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn embed(mut self, join: JoinSpec) -> Self {
        self.join = Some(join);
        self
    }
}

/// Invocation of a server-side function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionCall {
    pub name: String,
    /// Named arguments, in declaration order
    pub args: Vec<(String, FilterValue)>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }
}

/// Anything the executor can send to a backend
#[derive(Debug, Clone, Copy)]
pub enum Request<'a> {
    Select(&'a QueryDescriptor),
    Call(&'a FunctionCall),
}

impl Request<'_> {
    /// Short label for logs and diagnostics
    pub fn target(&self) -> &str {
        match self {
            Request::Select(q) => &q.table,
            Request::Call(c) => &c.name,
        }
    }
}

/// Only plain identifiers may be interpolated into SQL or URLs
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() < 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}
