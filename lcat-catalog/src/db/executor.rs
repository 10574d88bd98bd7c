//! Query execution with primary → secondary fallback
//!
//! Each request runs against the primary backend under a per-call timeout.
//! If (and only if) that fails, the secondary backend is tried once. An
//! empty result is a success and never triggers fallback. Cancellation
//! stops the attempt in flight and skips the secondary.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backend::{Backend, BackendFailure, BackendKind, FailureKind, RowSet};
use super::descriptor::{FunctionCall, QueryDescriptor, Request};

/// Every backend attempted for one request failed
#[derive(Debug, Clone, Error)]
#[error("{target}: {}", FailureList(.failures))]
pub struct ExecFailure {
    pub target: String,
    /// One entry per backend attempted, in attempt order
    pub failures: Vec<BackendFailure>,
}

struct FailureList<'a>(&'a [BackendFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl ExecFailure {
    pub fn was_cancelled(&self) -> bool {
        self.failures
            .iter()
            .any(|f| f.kind == FailureKind::Cancelled)
    }
}

/// Runs queries and function calls against the configured backends
#[derive(Clone)]
pub struct QueryExecutor {
    primary: Arc<dyn Backend>,
    secondary: Option<Arc<dyn Backend>>,
    call_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(
        primary: Arc<dyn Backend>,
        secondary: Option<Arc<dyn Backend>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            call_timeout,
        }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Run `request` on one specific backend, bounded by the call timeout
    pub async fn execute(
        &self,
        kind: BackendKind,
        request: Request<'_>,
        cancel: &CancellationToken,
    ) -> Result<RowSet, BackendFailure> {
        let backend = match kind {
            BackendKind::Primary => &self.primary,
            BackendKind::Secondary => self.secondary.as_ref().ok_or_else(|| {
                BackendFailure::new(kind, FailureKind::Unsupported, "no secondary backend configured")
            })?,
        };

        if cancel.is_cancelled() {
            return Err(BackendFailure::new(kind, FailureKind::Cancelled, "request cancelled"));
        }

        let work = async {
            match request {
                Request::Select(query) => backend.fetch(query).await,
                Request::Call(call) => backend.call(call).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(BackendFailure::new(kind, FailureKind::Cancelled, "request cancelled"))
            }
            result = tokio::time::timeout(self.call_timeout, work) => match result {
                Ok(result) => result,
                Err(_) => Err(BackendFailure::new(
                    kind,
                    FailureKind::Timeout,
                    format!("no response within {}ms", self.call_timeout.as_millis()),
                )),
            },
        }
    }

    /// Primary first, then the secondary once if the primary failed
    pub async fn run(
        &self,
        request: Request<'_>,
        cancel: &CancellationToken,
    ) -> Result<RowSet, ExecFailure> {
        let mut failures = Vec::with_capacity(2);

        match self.execute(BackendKind::Primary, request, cancel).await {
            Ok(rows) => {
                debug!(target = request.target(), rows = rows.len(), "Primary answered");
                return Ok(rows);
            }
            Err(failure) => {
                let fall_back = failure.should_try_other_backend() && self.secondary.is_some();
                if fall_back {
                    warn!(target = request.target(), "{}; falling back to secondary", failure);
                }
                failures.push(failure);
                if !fall_back {
                    return Err(ExecFailure {
                        target: request.target().to_string(),
                        failures,
                    });
                }
            }
        }

        match self.execute(BackendKind::Secondary, request, cancel).await {
            Ok(rows) => {
                debug!(target = request.target(), rows = rows.len(), "Secondary answered");
                Ok(rows)
            }
            Err(failure) => {
                warn!(target = request.target(), "{}", failure);
                failures.push(failure);
                Err(ExecFailure {
                    target: request.target().to_string(),
                    failures,
                })
            }
        }
    }

    pub async fn fetch(
        &self,
        query: &QueryDescriptor,
        cancel: &CancellationToken,
    ) -> Result<RowSet, ExecFailure> {
        self.run(Request::Select(query), cancel).await
    }

    pub async fn call(
        &self,
        call: &FunctionCall,
        cancel: &CancellationToken,
    ) -> Result<RowSet, ExecFailure> {
        self.run(Request::Call(call), cancel).await
    }
}
