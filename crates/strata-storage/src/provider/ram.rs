//! In-memory block device for tests
//!
//! Deliberately stricter than a real disk: reading an address nothing
//! ever wrote is an error, not zeros, so callers that assume implicit
//! zero-initialization fail fast in tests.

use crate::block::Block;
use crate::layout::is_valid_block_size;
use crate::provider::Provider;
use strata_common::{Error, Result};

/// RAM-backed provider; a missing slot means "never written"
pub struct RamProvider {
    block_size: u32,
    blocks: Vec<Option<Block>>,
}

impl RamProvider {
    /// Create a device of `block_count` blocks, none of them written
    pub fn new(block_count: u64, block_size: u32) -> Result<Self> {
        if !is_valid_block_size(block_size) {
            return Err(Error::InvalidBlockSize(block_size));
        }
        Ok(Self {
            block_size,
            blocks: vec![None; block_count as usize],
        })
    }

    fn check_range(&self, address: u64) -> Result<usize> {
        if address >= self.block_count() {
            return Err(Error::OutOfRange {
                address,
                block_count: self.block_count(),
            });
        }
        Ok(address as usize)
    }
}

impl Provider for RamProvider {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    /// The RAM device cannot actually grow; only the current size is
    /// accepted
    fn enlarge(&mut self, block_count: u64) -> Result<bool> {
        Ok(block_count == self.block_count())
    }

    fn write(&mut self, address: u64, block: &Block) -> Result<()> {
        let slot = self.check_range(address)?;
        if block.len() != self.block_size as usize {
            return Err(Error::WrongBlockLength {
                expected: self.block_size,
                actual: block.len(),
            });
        }
        // Defensive copy, callers keep ownership of their buffer
        self.blocks[slot] = Some(block.clone());
        Ok(())
    }

    fn read(&self, address: u64) -> Result<Option<Block>> {
        let slot = self.check_range(address)?;
        match &self.blocks[slot] {
            Some(block) => Ok(Some(block.clone())),
            None => Err(Error::UninitializedRead { address }),
        }
    }

    fn physical_location(&self, address: u64) -> String {
        match self.blocks.get(address as usize) {
            Some(Some(block)) => format!("ram:@{:p}", block.as_slice().as_ptr()),
            Some(None) => format!("ram:@block-{address}-unwritten"),
            None => format!("ram:@block-{address}-out-of-range"),
        }
    }
}
