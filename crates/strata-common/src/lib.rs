//! Strata Common - Shared types and utilities
//!
//! This crate provides the error taxonomy and validated domain types
//! used across all Strata components.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DatabaseName, DatabaseNameError, MAX_DATABASE_NAME_LEN};
