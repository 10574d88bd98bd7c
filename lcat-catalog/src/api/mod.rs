//! HTTP API handlers for the catalog service
//!
//! Every catalog endpoint answers HTTP 200 with an [`Envelope`]. Handlers
//! receive a typed `Result<Resolution<T>, FailureReason>` from the resolver
//! and only collapse it into the envelope here.

pub mod catalog;
pub mod diagnostics;
pub mod health;

pub use catalog::catalog_routes;
pub use diagnostics::get_diagnostics;
pub use health::health_routes;

use axum::Json;
use lcat_common::api::{Diagnostic, Envelope};
use tracing::warn;

use crate::resolve::{AttemptOutcome, FailureReason, Resolution};

/// Caller-facing view of the recorded attempts
pub fn diagnostics_of(reason: &FailureReason) -> Vec<Diagnostic> {
    reason
        .attempts()
        .iter()
        .map(|attempt| match &attempt.outcome {
            AttemptOutcome::Skipped { reason } => {
                Diagnostic::new(attempt.strategy, "skipped", Some(reason.clone()))
            }
            AttemptOutcome::Empty => Diagnostic::new(attempt.strategy, "empty", None),
            AttemptOutcome::Failed { reason } => {
                Diagnostic::new(attempt.strategy, "failed", Some(reason.clone()))
            }
        })
        .collect()
}

/// Message for a failed resolution
fn failure_message(what: &str, reason: &FailureReason) -> String {
    match reason {
        FailureReason::InvalidInput(detail) => format!("Invalid request: {}", detail),
        FailureReason::NotFound { entity, id, .. } => {
            let mut entity = entity.to_string();
            if let Some(first) = entity.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            format!("{} {} not found", entity, id)
        }
        FailureReason::NoRelationship { .. } => format!("No {} found", what),
        FailureReason::Exhausted { .. } => format!("Failed to resolve {}", what),
        FailureReason::Cancelled { .. } => format!("Request for {} was cancelled", what),
    }
}

/// Collapse a resolution into the always-200 envelope
///
/// `fallback` is the `data` sent on failure (an empty collection, or `None`
/// for single entities); `describe` builds the success message.
pub fn respond<T>(
    what: &str,
    result: Result<Resolution<T>, FailureReason>,
    fallback: Option<T>,
    describe: impl FnOnce(&T) -> String,
) -> Json<Envelope<T>> {
    match result {
        Ok(resolution) => {
            let message = describe(&resolution.value);
            Json(
                Envelope::ok(resolution.value, message)
                    .with_source(format!("{}:{}", resolution.backend, resolution.source))
                    .with_confidence(resolution.confidence.as_str()),
            )
        }
        Err(reason) => {
            if !matches!(reason, FailureReason::InvalidInput(_)) {
                warn!(what, "Resolution failed: {}", reason);
            }
            let message = failure_message(what, &reason);
            Json(Envelope::failure(message, fallback).with_diagnostics(diagnostics_of(&reason)))
        }
    }
}
