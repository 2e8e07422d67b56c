//! Error types for Strata
//!
//! This module defines the common error types used throughout the system.

use crate::types::DatabaseNameError;
use thiserror::Error;

/// Common result type for Strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Strata
#[derive(Debug, Error)]
pub enum Error {
    // Device errors
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("block address {address} out of range: device has {block_count} blocks")]
    OutOfRange { address: u64, block_count: u64 },

    #[error("uninitialized read: block {address} was never written")]
    UninitializedRead { address: u64 },

    #[error("backing file {path} is {len} bytes, not a multiple of block size {block_size}")]
    MisalignedDevice {
        path: String,
        len: u64,
        block_size: u32,
    },

    // Contract violations
    #[error("wrong block length: device block size is {expected} bytes, got {actual}")]
    WrongBlockLength { expected: u32, actual: usize },

    #[error("invalid block size {0}: must be a multiple of 512 between 512 and 4096")]
    InvalidBlockSize(u32),

    #[error("invalid database name: {0}")]
    InvalidName(#[from] DatabaseNameError),

    // Format errors
    #[error("invalid database header: {0}")]
    InvalidHeader(&'static str),
}

impl Error {
    /// Check if this error signals a caller contract violation rather
    /// than a device condition.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::WrongBlockLength { .. } | Self::InvalidBlockSize(_) | Self::InvalidName(_)
        )
    }

    /// Check if this is an out-of-range address error
    #[must_use]
    pub const fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }
}
