//! lcat-catalog library - label catalog relationship resolution
//!
//! Read-only service answering "which releases belong to this artist" and
//! keyed catalog lookups against a pooled SQL store, with a PostgREST-style
//! proxy as secondary backend and an ordered chain of fallback strategies.

use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod health;
pub mod normalize;
pub mod pagination;
pub mod resolve;

#[cfg(test)]
pub(crate) mod testing;

use health::HealthReporter;
use resolve::CatalogResolver;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<CatalogResolver>,
    pub reporter: Arc<HealthReporter>,
    /// Cancelled on server shutdown; each request works on a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state
    pub fn new(resolver: CatalogResolver, reporter: HealthReporter, shutdown: CancellationToken) -> Self {
        Self {
            resolver: Arc::new(resolver),
            reporter: Arc::new(reporter),
            shutdown,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let trace = TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
        tracing::info_span!(
            "request",
            id = %uuid::Uuid::new_v4(),
            method = %request.method(),
            path = %request.uri().path(),
        )
    });

    Router::new()
        .merge(api::catalog_routes())
        .merge(api::health_routes())
        .layer(trace)
        .with_state(state)
}
