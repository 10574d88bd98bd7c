//! # Label Catalog Common Library
//!
//! Shared code for the catalog crates:
//! - Canonical entity models (artists, releases, tracks, labels)
//! - Response envelope types
//! - Configuration loading
//! - Common error type

pub mod api;
pub mod config;
pub mod error;
pub mod models;

pub use error::{Error, Result};
