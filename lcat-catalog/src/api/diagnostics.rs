//! Backend diagnostics endpoint

use axum::{extract::State, Json};
use lcat_common::api::Envelope;

use crate::health::HealthReport;
use crate::AppState;

/// GET /api/diagnostics
///
/// `success` reflects whether any backend could enumerate tables; the
/// report is returned either way.
pub async fn get_diagnostics(State(state): State<AppState>) -> Json<Envelope<HealthReport>> {
    let cancel = state.shutdown.child_token();
    let report = state.reporter.report(&cancel).await;

    if report.inventory_source.is_some() {
        let message = format!(
            "{} tables, {} errors",
            report.table_inventory.len(),
            report.errors.len()
        );
        Json(Envelope::ok(report, message))
    } else {
        Json(Envelope::failure("No backend reachable", Some(report)))
    }
}
