//! Shared API response types
//!
//! Every catalog endpoint answers HTTP 200 with an [`Envelope`]; the
//! `success` flag (not the status code) signals resolution failure.

use serde::{Deserialize, Serialize};

// ========================================
// Envelope
// ========================================

/// Response envelope returned by every catalog endpoint
///
/// # Examples
///
/// ```
/// use lcat_common::api::types::Envelope;
///
/// let ok = Envelope::ok(vec!["R1"], "Found 1 release");
/// assert!(ok.success);
///
/// let failed: Envelope<Vec<&str>> = Envelope::failure("Artist id is required", Some(Vec::new()));
/// assert!(!failed.success);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
    /// Which strategy or backend produced `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// How closely `data` is related to the request (`relationship`,
    /// `heuristic` or `unrelated`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
    /// Per-strategy outcomes, only populated on failure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Envelope<T> {
    /// Successful response
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            source: None,
            confidence: None,
            diagnostics: Vec::new(),
        }
    }

    /// Failed response; `data` is an empty/placeholder value or `None`
    pub fn failure(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
            source: None,
            confidence: None,
            diagnostics: Vec::new(),
        }
    }

    /// Attach the producing source
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach the relatedness of `data`
    pub fn with_confidence(mut self, confidence: impl Into<String>) -> Self {
        self.confidence = Some(confidence.into());
        self
    }

    /// Attach diagnostics
    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

// ========================================
// Diagnostics
// ========================================

/// One resolution step as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Strategy (or backend step) name
    pub step: String,
    /// `skipped`, `empty` or `failed`
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Diagnostic {
    pub fn new(step: impl Into<String>, outcome: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            step: step.into(),
            outcome: outcome.into(),
            reason,
        }
    }
}

// ========================================
// Tests
// ========================================
