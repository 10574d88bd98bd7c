//! Data access layer
//!
//! Two interchangeable backends sit behind [`Backend`]/[`SchemaProbe`]: the
//! pooled SQL store ([`SqlBackend`]) and the hosted REST proxy
//! ([`RestBackend`]). [`QueryExecutor`] runs a request against the primary
//! and falls back to the secondary; [`SchemaInspector`] answers and caches
//! metadata questions. All access is read-only.

use lcat_common::{Error, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub mod backend;
pub mod descriptor;
pub mod executor;
pub mod inspector;
pub mod rest;
pub mod sql;

pub use backend::{
    value_as_id, Backend, BackendFailure, BackendKind, ColumnInfo, FailureKind, RawRow, RowSet,
    RowShape, SchemaProbe,
};
pub use descriptor::{
    Direction, FilterValue, FunctionCall, JoinSpec, Operator, QueryDescriptor, Request,
};
pub use executor::{ExecFailure, QueryExecutor};
pub use inspector::{Presence, SchemaInspector};
pub use rest::RestBackend;
pub use sql::SqlBackend;

/// SQL flavour of the primary store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Detect the dialect from a connection URL
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("sqlite:") {
            Some(Dialect::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Dialect::Postgres)
        } else {
            None
        }
    }

    /// Placeholder for the `index`-th bind value (1-based)
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Sqlite => "?".to_string(),
            Dialect::Postgres => format!("${}", index),
        }
    }
}

/// Connection pool for either dialect
#[derive(Debug, Clone)]
pub enum SqlPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl SqlPool {
    pub fn dialect(&self) -> Dialect {
        match self {
            SqlPool::Sqlite(_) => Dialect::Sqlite,
            SqlPool::Postgres(_) => Dialect::Postgres,
        }
    }

    pub async fn close(&self) {
        match self {
            SqlPool::Sqlite(pool) => pool.close().await,
            SqlPool::Postgres(pool) => pool.close().await,
        }
    }
}

/// Open a read-only pool to the primary store
///
/// Connections are opened lazily, so an unreachable store does not prevent
/// startup; the executor falls back to the REST proxy instead.
pub async fn connect_pool(
    url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<SqlPool> {
    let pool = match Dialect::from_url(url) {
        Some(Dialect::Sqlite) => {
            let options = SqliteConnectOptions::from_str(url)?.read_only(true);
            SqlPool::Sqlite(
                SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect_lazy_with(options),
            )
        }
        Some(Dialect::Postgres) => {
            let options = PgConnectOptions::from_str(url)?
                .options([("default_transaction_read_only", "on")]);
            SqlPool::Postgres(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect_lazy_with(options),
            )
        }
        None => {
            return Err(Error::Config(format!(
                "Unsupported database URL (expected sqlite: or postgres://): {}",
                redact(url)
            )))
        }
    };

    info!(
        "Primary store pool configured ({:?}, max {} connections)",
        pool.dialect(),
        max_connections
    );
    Ok(pool)
}

/// Strip credentials from a URL before logging it
pub fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
