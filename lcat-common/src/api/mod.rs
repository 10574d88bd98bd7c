//! API module for shared HTTP response types
//!
//! Contains only framework-independent types; the catalog service wraps
//! them in axum handlers.

pub mod types;

pub use types::{Diagnostic, Envelope};
