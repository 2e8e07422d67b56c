//! Raw block device providers
//!
//! A [`Provider`] is the bottom of the stack: it moves whole blocks
//! between memory and a device, one synchronous call at a time. The
//! block cache decorates a provider; the formatter writes straight
//! through one.
//!
//! Two implementations ship here: [`FileProvider`] over a host file with
//! host buffering disabled, and [`RamProvider`], the in-memory test
//! double that refuses to read blocks nothing ever wrote.

use crate::block::Block;
use strata_common::Result;

pub mod file;
pub mod ram;

pub use file::FileProvider;
pub use ram::RamProvider;

/// Contract for a raw block device.
///
/// Operations are not thread-safe; a provider belongs to exactly one
/// device session and callers serialize access above this layer. Every
/// call either completes or fails immediately, and a returned `write`
/// is durable from the provider's perspective.
pub trait Provider {
    /// Device block size in bytes, fixed when the device is opened
    fn block_size(&self) -> u32;

    /// Total device size in blocks
    fn block_count(&self) -> u64;

    /// Attempt to grow the device to at least `block_count` blocks.
    /// `Ok(false)` when the provider cannot reach that size; never
    /// shrinks the device.
    fn enlarge(&mut self, block_count: u64) -> Result<bool>;

    /// Persist `block` at `address`. Fails on an out-of-range address or
    /// a block whose length is not exactly the device block size.
    fn write(&mut self, address: u64, block: &Block) -> Result<()>;

    /// Contents previously written at `address`. Fails on an
    /// out-of-range address; `Ok(None)` when the provider holds no data
    /// for an in-range address.
    fn read(&self, address: u64) -> Result<Option<Block>>;

    /// Diagnostic string locating the block physically
    fn physical_location(&self, address: u64) -> String;
}

impl<P: Provider + ?Sized> Provider for Box<P> {
    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn enlarge(&mut self, block_count: u64) -> Result<bool> {
        (**self).enlarge(block_count)
    }

    fn write(&mut self, address: u64, block: &Block) -> Result<()> {
        (**self).write(address, block)
    }

    fn read(&self, address: u64) -> Result<Option<Block>> {
        (**self).read(address)
    }

    fn physical_location(&self, address: u64) -> String {
        (**self).physical_location(address)
    }
}
