//! Secondary backend: hosted PostgREST-style proxy over the same tables
//!
//! Table reads are `GET {url}/rest/v1/{table}?...`, functions are
//! `POST {url}/rest/v1/rpc/{name}`. Many-to-many relations are embedded
//! through the join table, so rows come back in the nested shape:
//! `{"id": ..., "artists": [{"role": "primary", "member": {...}}]}`.

use async_trait::async_trait;
use lcat_common::config::RestConfig;
use reqwest::RequestBuilder;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::backend::{
    Backend, BackendFailure, BackendKind, ColumnInfo, FailureKind, RawRow, RowSet, RowShape,
    SchemaProbe,
};
use super::descriptor::{
    is_valid_identifier, Direction, FilterValue, FunctionCall, Operator, QueryDescriptor,
};

const USER_AGENT: &str = concat!("lcat-catalog/", env!("CARGO_PKG_VERSION"));

/// Key of the related entity inside each embedded join-table element
pub const EMBED_MEMBER_FIELD: &str = "member";

/// Error bodies are truncated to this many bytes in failure messages
const MAX_ERROR_BODY: usize = 300;

fn check_identifier(name: &str) -> Result<&str, String> {
    if is_valid_identifier(name) {
        Ok(name)
    } else {
        Err(format!("invalid identifier '{}'", name))
    }
}

/// `ilike` pattern matching `needle` as a literal substring
///
/// `%`, `_` and `\` are backslash-escaped. The proxy reads every `*` as a
/// wildcard, so a literal `*` can only be matched by the one-character `_`.
fn ilike_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('*');
    for c in needle.chars() {
        match c {
            '%' | '_' | '\\' => {
                pattern.push('\\');
                pattern.push(c);
            }
            '*' => pattern.push('_'),
            _ => pattern.push(c),
        }
    }
    pattern.push('*');
    pattern
}

/// Quote one member of an `in.(...)` list
fn quote_list_item(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn render_select_param(query: &QueryDescriptor) -> Result<String, String> {
    let mut select = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query
            .columns
            .iter()
            .map(|c| check_identifier(c).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?
            .join(",")
    };

    if let Some(join) = &query.join {
        let mut inner: Vec<String> = join
            .edge_columns
            .iter()
            .map(|c| check_identifier(c).map(str::to_string))
            .collect::<Result<_, _>>()?;
        let target_columns = if join.target_columns.is_empty() {
            "*".to_string()
        } else {
            join.target_columns
                .iter()
                .map(|c| check_identifier(c).map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?
                .join(",")
        };
        inner.push(format!(
            "{}:{}({})",
            EMBED_MEMBER_FIELD,
            check_identifier(&join.target)?,
            target_columns
        ));
        select.push_str(&format!(
            ",{}:{}({})",
            check_identifier(&join.alias)?,
            check_identifier(&join.through)?,
            inner.join(",")
        ));
    }

    Ok(select)
}

/// Render a descriptor as PostgREST query parameters
pub fn render_params(query: &QueryDescriptor) -> Result<Vec<(String, String)>, String> {
    let mut params = vec![("select".to_string(), render_select_param(query)?)];

    for predicate in &query.predicates {
        let column = check_identifier(&predicate.column)?.to_string();
        let value = match (&predicate.op, &predicate.value) {
            (Operator::Eq, FilterValue::Text(v)) => format!("eq.{}", v),
            (Operator::Eq, FilterValue::Int(v)) => format!("eq.{}", v),
            (Operator::Contains, FilterValue::Text(v)) => format!("ilike.{}", ilike_pattern(v)),
            (Operator::In, FilterValue::List(values)) => format!(
                "in.({})",
                values
                    .iter()
                    .map(|v| quote_list_item(v))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            (op, value) => {
                return Err(format!(
                    "operator {:?} cannot take value {:?} on column '{}'",
                    op, value, predicate.column
                ))
            }
        };
        params.push((column, value));
    }

    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|o| {
                let dir = match o.direction {
                    Direction::Asc => "asc",
                    Direction::Desc => "desc",
                };
                Ok(format!("{}.{}.nullslast", check_identifier(&o.column)?, dir))
            })
            .collect::<Result<Vec<_>, String>>()?;
        params.push(("order".to_string(), order.join(",")));
    }

    // Embedded edges in target-key order, as the SQL join yields them
    if let Some(join) = &query.join {
        params.push((
            format!("{}.order", check_identifier(&join.alias)?),
            format!("{}.asc", check_identifier(&join.target_key)?),
        ));
    }

    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = query.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }

    Ok(params)
}

/// JSON body for an RPC call
pub fn render_call_body(call: &FunctionCall) -> Value {
    let mut body = Map::new();
    for (name, value) in &call.args {
        let value = match value {
            FilterValue::Text(s) => Value::String(s.clone()),
            FilterValue::Int(i) => Value::from(*i),
            FilterValue::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        };
        body.insert(name.clone(), value);
    }
    Value::Object(body)
}

/// Interpret a response body as rows
///
/// Arrays of objects are rows; a single object is one row; a bare scalar
/// (scalar-returning function) becomes one row keyed by `scalar_key`.
pub fn parse_rows(body: Value, scalar_key: &str) -> Result<Vec<RawRow>, String> {
    match body {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(format!("expected row object, got {}", other)),
            })
            .collect(),
        Value::Object(map) => Ok(vec![map]),
        Value::Null => Ok(Vec::new()),
        scalar => {
            let mut row = Map::new();
            row.insert(scalar_key.to_string(), scalar);
            Ok(vec![row])
        }
    }
}

fn truncate(text: &str) -> &str {
    if text.len() <= MAX_ERROR_BODY {
        return text;
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn classify(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_decode() {
        FailureKind::Decode
    } else {
        FailureKind::Connection
    }
}

/// REST implementation of [`Backend`] and [`SchemaProbe`]
#[derive(Clone)]
pub struct RestBackend {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(config: &RestConfig, timeout: Duration) -> Result<Self, BackendFailure> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Self::failure(FailureKind::Connection, e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.key.clone(),
        })
    }

    fn failure(kind: FailureKind, message: impl Into<String>) -> BackendFailure {
        BackendFailure::new(BackendKind::Secondary, kind, message)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Send and return the parsed JSON body of a 2xx reply
    async fn send(&self, request: RequestBuilder) -> Result<Value, BackendFailure> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| Self::failure(classify(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::failure(
                FailureKind::Query,
                format!("HTTP {}: {}", status.as_u16(), truncate(&error_text)),
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Self::failure(classify(&e), e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| Self::failure(FailureKind::Decode, e.to_string()))
    }

    async fn rpc(&self, call: &FunctionCall) -> Result<Vec<RawRow>, BackendFailure> {
        let name = check_identifier(&call.name)
            .map_err(|e| Self::failure(FailureKind::Query, e))?;
        debug!(function = %name, "Calling secondary RPC");

        let request = self
            .http_client
            .post(self.endpoint(&format!("rpc/{}", name)))
            .json(&render_call_body(call));
        let body = self.send(request).await?;
        parse_rows(body, name).map_err(|e| Self::failure(FailureKind::Decode, e))
    }

    async fn rpc_bool(&self, call: FunctionCall) -> Result<bool, BackendFailure> {
        let rows = self.rpc(&call).await?;
        let value = rows
            .first()
            .and_then(|row| row.get(&call.name).or_else(|| row.values().next()))
            .cloned()
            .unwrap_or(Value::Bool(false));
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(Self::failure(
                FailureKind::Decode,
                format!("{} returned non-boolean {}", call.name, other),
            )),
        }
    }

    /// OpenAPI description served at the API root
    async fn openapi(&self) -> Result<Value, BackendFailure> {
        self.send(self.http_client.get(self.endpoint(""))).await
    }
}

#[async_trait]
impl Backend for RestBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Secondary
    }

    async fn fetch(&self, query: &QueryDescriptor) -> Result<RowSet, BackendFailure> {
        let table = check_identifier(&query.table)
            .map_err(|e| Self::failure(FailureKind::Query, e))?;
        let params = render_params(query).map_err(|e| Self::failure(FailureKind::Query, e))?;
        debug!(table = %table, params = params.len(), "Fetching from secondary");

        let request = self.http_client.get(self.endpoint(table)).query(&params);
        let body = self.send(request).await?;
        let rows = parse_rows(body, table).map_err(|e| Self::failure(FailureKind::Decode, e))?;

        let shape = match &query.join {
            Some(join) => RowShape::Nested {
                field: join.alias.clone(),
            },
            None => RowShape::Flat,
        };
        Ok(RowSet::new(BackendKind::Secondary, shape, rows))
    }

    async fn call(&self, call: &FunctionCall) -> Result<RowSet, BackendFailure> {
        let rows = self.rpc(call).await?;
        Ok(RowSet::new(BackendKind::Secondary, RowShape::Flat, rows))
    }
}

#[async_trait]
impl SchemaProbe for RestBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Secondary
    }

    async fn table_exists(&self, table: &str) -> Result<bool, BackendFailure> {
        let table = check_identifier(table).map_err(|e| Self::failure(FailureKind::Query, e))?;
        let request = self
            .http_client
            .get(self.endpoint(table))
            .query(&[("limit", "0")]);
        match self.send(request).await {
            Ok(_) => Ok(true),
            Err(failure)
                if failure.kind == FailureKind::Query
                    && failure.message.starts_with("HTTP 404") =>
            {
                Ok(false)
            }
            Err(failure) => Err(failure),
        }
    }

    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, BackendFailure> {
        self.rpc_bool(
            FunctionCall::new("column_exists")
                .arg("table_name", table)
                .arg("column_name", column),
        )
        .await
    }

    async fn function_exists(&self, name: &str) -> Result<bool, BackendFailure> {
        self.rpc_bool(FunctionCall::new("function_exists").arg("function_name", name))
            .await
    }

    async fn list_tables(&self) -> Result<Vec<String>, BackendFailure> {
        let document = self.openapi().await?;
        let definitions = document
            .get("definitions")
            .and_then(Value::as_object)
            .ok_or_else(|| Self::failure(FailureKind::Decode, "OpenAPI document has no definitions"))?;
        let mut tables: Vec<String> = definitions.keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }

    /// Columns from the OpenAPI definition (alphabetical; the proxy does
    /// not expose declaration order)
    async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, BackendFailure> {
        let document = self.openapi().await?;
        let properties = document
            .get("definitions")
            .and_then(|d| d.get(table))
            .and_then(|t| t.get("properties"))
            .and_then(Value::as_object)
            .ok_or_else(|| {
                Self::failure(FailureKind::Query, format!("table '{}' not described", table))
            })?;

        Ok(properties
            .iter()
            .map(|(name, property)| ColumnInfo {
                name: name.clone(),
                type_name: property
                    .get("format")
                    .or_else(|| property.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect())
    }
}
