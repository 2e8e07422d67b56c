//! Strata Storage Engine - Physical block layer
//!
//! This crate implements the block substrate a Strata database sits on:
//! - Block and allocation-bitmap primitives
//! - The provider contract for synchronous, durable block devices
//! - A host-file provider (O_DIRECT / F_NOCACHE) and an in-memory provider
//! - A type-aware write-through block cache with pluggable policies
//! - On-disk layout: header codec, address geometry, device formatting

pub mod block;
pub mod cache;
pub mod format;
pub mod layout;
pub mod provider;

// Re-exports
pub use block::{BLOCK_ALIGNMENT, Block, BlockBitmap};
pub use cache::{BlockCache, BlockType, CacheKey, CachePolicy, CacheStats, LruPolicy, PassthroughPolicy};
pub use format::format;
pub use layout::{
    DatabaseHeader, FIRST_ALLOCATION_BLOCK, FIRST_SUPER_BLOCK, Geometry, HEADER_ENCODED_LEN,
    HEADER_MAGIC1, HEADER_MAGIC2, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, NAME_FIELD_LEN,
    is_valid_block_size,
};
pub use provider::{FileProvider, Provider, RamProvider};
