//! Device formatter
//!
//! Lays a fresh database image onto a provider: the header in block 0,
//! zeroed super blocks, and one bitmap per allocation region. Regular
//! regions start all-free; journal sectors are marked fully used so the
//! allocator can never hand out journal space, and get a zeroed journal
//! header block right after their bitmap.

use crate::block::{Block, BlockBitmap};
use crate::layout::DatabaseHeader;
use crate::provider::Provider;
use strata_common::{DatabaseName, Result};
use tracing::{debug, info};

/// Format the device as an empty database.
///
/// Returns `Ok(false)` without touching the device when the provider
/// cannot supply `block_count` blocks. Blocks outside the structural
/// set keep whatever the device held before.
pub fn format<P: Provider>(
    provider: &mut P,
    name: &str,
    block_count: u64,
    journal_frequency: u32,
) -> Result<bool> {
    let name = DatabaseName::new(name)?;

    if !provider.enlarge(block_count)? {
        return Ok(false);
    }

    let header = DatabaseHeader::new(name, provider.block_size(), block_count, journal_frequency)?;
    let geometry = header.geometry();

    info!(
        name = %header.name,
        block_count,
        block_size = header.block_size,
        journal_frequency,
        "formatting device"
    );

    provider.write(0, &header.encode())?;

    let zeroed = Block::zeroed(header.block_size);
    let mut super_count = 0u64;
    for address in geometry.super_blocks() {
        provider.write(address, &zeroed)?;
        super_count += 1;
    }

    let bits = geometry.bits_per_block();
    let mut allocation_count = 0u64;
    let mut journal_count = 0u64;

    for address in geometry.allocation_blocks() {
        allocation_count += 1;
        let mut bitmap = BlockBitmap::new(bits as usize);

        if geometry.is_journal_sector(address + 1) {
            journal_count += 1;
            bitmap.set_all(true);
            provider.write(address, &bitmap.to_block())?;
            // The journal header itself, when the device is long enough
            // to hold it
            if address + 1 < block_count {
                provider.write(address + 1, &zeroed)?;
            }
        } else {
            // Positions past the device end stay permanently used so the
            // allocator never hands them out
            for bit in geometry.tracked_blocks(address)..bits {
                bitmap.set(bit as usize, true);
            }
            provider.write(address, &bitmap.to_block())?;
        }
    }

    debug!(
        super_count,
        allocation_count, journal_count, "device formatted"
    );

    Ok(true)
}
