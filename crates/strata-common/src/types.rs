//! Core type definitions for Strata
//!
//! This module defines the validated domain types shared across the
//! storage layers, most importantly the database name stored in the
//! device header.

use derive_more::Display;
use std::fmt;

/// Maximum database name length in bytes, excluding the NUL terminator.
/// The header stores the name in a 64-byte field.
pub const MAX_DATABASE_NAME_LEN: usize = 63;

/// Name of a database, as stored NUL-terminated in the device header
#[derive(Clone, PartialEq, Eq, Hash, Display)]
#[display("{_0}")]
pub struct DatabaseName(String);

impl DatabaseName {
    /// Create a new database name (validates header field rules)
    pub fn new(name: impl Into<String>) -> Result<Self, DatabaseNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the database name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate that the name fits the fixed header field
    fn validate(name: &str) -> Result<(), DatabaseNameError> {
        if name.is_empty() {
            return Err(DatabaseNameError::Empty);
        }

        // Byte length governs, the field is 64 bytes with a NUL terminator
        if name.len() > MAX_DATABASE_NAME_LEN {
            return Err(DatabaseNameError::TooLong(name.len()));
        }

        if name.bytes().any(|b| b == 0) {
            return Err(DatabaseNameError::EmbeddedNul);
        }

        Ok(())
    }
}

impl fmt::Debug for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseName({:?})", self.0)
    }
}

/// Errors that can occur when creating a database name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseNameError {
    #[error("database name cannot be empty")]
    Empty,
    #[error("database name is {0} bytes, limit is 63")]
    TooLong(usize),
    #[error("database name cannot contain a NUL byte")]
    EmbeddedNul,
}
