//! On-disk layout: database header and address geometry
//!
//! Device layout, all positions in blocks of `block_size` bytes:
//! ```text
//! +--------------------+  Block 0
//! |  DatabaseHeader    |  magic pair, geometry, root address, name
//! +--------------------+  Block 1
//! |  Super block       |  zeroed reserved block, one per super region
//! +--------------------+  Block 2
//! |  Allocation block  |  bitmap for the `block_size * 8` blocks after it
//! +--------------------+  Block 3 ..
//! |  Tracked blocks    |  owned by higher layers (or a journal region)
//! +--------------------+
//! |  ...               |  allocation regions repeat; every
//! |                    |  `journal_frequency`-th one is a journal sector
//! +--------------------+
//! ```
//!
//! Super blocks and allocation blocks sit at positions derived purely from
//! `block_size`; nothing on disk points at them. [`Geometry`] is the single
//! source of that arithmetic for the formatter and every layer above.

use crate::block::Block;
use bytes::{Buf, BufMut};
use strata_common::{DatabaseName, Error, Result};

/// First magic constant of the database header
pub const HEADER_MAGIC1: u64 = 0xAF76_AD63_97BC_CDF4;

/// Second magic constant, complement of the first
pub const HEADER_MAGIC2: u64 = !HEADER_MAGIC1;

/// Size of the NUL-terminated name field in the header
pub const NAME_FIELD_LEN: usize = 64;

/// Encoded header length:
/// magic1(8) + magic2(8) + block_size(4) + block_count(8) +
/// journal_frequency(4) + root_object_address(8) + name(64) = 104
pub const HEADER_ENCODED_LEN: usize = 104;

/// Smallest supported block size
pub const MIN_BLOCK_SIZE: u32 = 512;

/// Largest supported block size
pub const MAX_BLOCK_SIZE: u32 = 4096;

/// Address of the first super block
pub const FIRST_SUPER_BLOCK: u64 = 1;

/// Address of the first allocation block
pub const FIRST_ALLOCATION_BLOCK: u64 = 2;

/// Check whether `block_size` is a supported device block size
#[must_use]
pub const fn is_valid_block_size(block_size: u32) -> bool {
    block_size % MIN_BLOCK_SIZE == 0
        && block_size >= MIN_BLOCK_SIZE
        && block_size <= MAX_BLOCK_SIZE
}

/// Database header stored in block 0 of every formatted device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    /// Database name, NUL-terminated on disk
    pub name: DatabaseName,
    /// Device block size in bytes
    pub block_size: u32,
    /// Total device size in blocks
    pub block_count: u64,
    /// Journal sector spacing in allocation blocks, 0 = head journal only
    pub journal_frequency: u32,
    /// Entry point of the object graph above this layer, 0 = none yet
    pub root_object_address: u64,
}

impl DatabaseHeader {
    /// Create a header for a fresh device, with no root object
    pub fn new(
        name: DatabaseName,
        block_size: u32,
        block_count: u64,
        journal_frequency: u32,
    ) -> Result<Self> {
        if !is_valid_block_size(block_size) {
            return Err(Error::InvalidBlockSize(block_size));
        }
        Ok(Self {
            name,
            block_size,
            block_count,
            journal_frequency,
            root_object_address: 0,
        })
    }

    /// Serialize the header into a zero-padded block of `block_size` bytes
    #[must_use]
    pub fn encode(&self) -> Block {
        let mut block = Block::zeroed(self.block_size);
        let mut buf = block.as_mut_slice();

        buf.put_u64_le(HEADER_MAGIC1);
        buf.put_u64_le(HEADER_MAGIC2);
        buf.put_u32_le(self.block_size);
        buf.put_u64_le(self.block_count);
        buf.put_u32_le(self.journal_frequency);
        buf.put_u64_le(self.root_object_address);
        // Remainder of the 64-byte name field is already zero
        buf.put_slice(self.name.as_str().as_bytes());

        block
    }

    /// Parse and validate a header from block 0
    pub fn decode(block: &Block) -> Result<Self> {
        if block.len() < HEADER_ENCODED_LEN {
            return Err(Error::InvalidHeader("block too small for header"));
        }

        let mut buf = block.as_slice();

        if buf.get_u64_le() != HEADER_MAGIC1 || buf.get_u64_le() != HEADER_MAGIC2 {
            return Err(Error::InvalidHeader("magic mismatch"));
        }

        let block_size = buf.get_u32_le();
        if !is_valid_block_size(block_size) {
            return Err(Error::InvalidBlockSize(block_size));
        }

        let block_count = buf.get_u64_le();
        let journal_frequency = buf.get_u32_le();
        let root_object_address = buf.get_u64_le();

        let name_field = &buf[..NAME_FIELD_LEN];
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_FIELD_LEN);
        let name = std::str::from_utf8(&name_field[..name_len])
            .map_err(|_| Error::InvalidHeader("name is not valid UTF-8"))?;
        let name = DatabaseName::new(name)?;

        Ok(Self {
            name,
            block_size,
            block_count,
            journal_frequency,
            root_object_address,
        })
    }

    /// Address geometry for the device this header describes
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        Geometry {
            block_size: self.block_size,
            block_count: self.block_count,
            journal_frequency: self.journal_frequency,
        }
    }
}

/// Pure address arithmetic for a device's structural blocks.
///
/// Positions are classified arithmetically without consulting the device;
/// only the iterators and [`Geometry::allocation_block_at`] bound their
/// results by `block_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    block_size: u32,
    block_count: u64,
    journal_frequency: u32,
}

impl Geometry {
    /// Create the geometry for a device
    pub fn new(block_size: u32, block_count: u64, journal_frequency: u32) -> Result<Self> {
        if !is_valid_block_size(block_size) {
            return Err(Error::InvalidBlockSize(block_size));
        }
        Ok(Self {
            block_size,
            block_count,
            journal_frequency,
        })
    }

    /// Device block size in bytes
    #[must_use]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Total device size in blocks
    #[must_use]
    pub const fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Journal sector spacing in allocation blocks
    #[must_use]
    pub const fn journal_frequency(&self) -> u32 {
        self.journal_frequency
    }

    /// Blocks tracked per allocation bitmap, one bit per block
    #[must_use]
    pub const fn bits_per_block(&self) -> u64 {
        self.block_size as u64 * 8
    }

    /// Blocks per allocation region: the allocation block plus its tracked run
    #[must_use]
    pub const fn allocation_stride(&self) -> u64 {
        self.bits_per_block() + 1
    }

    /// Blocks per super region: the super block plus its allocation regions
    #[must_use]
    pub const fn super_stride(&self) -> u64 {
        self.bits_per_block() * self.allocation_stride() + 1
    }

    /// Addresses of all super blocks on the device, in order
    pub fn super_blocks(self) -> impl Iterator<Item = u64> {
        let stride = self.super_stride();
        std::iter::successors(
            (FIRST_SUPER_BLOCK < self.block_count).then_some(FIRST_SUPER_BLOCK),
            move |&address| {
                address
                    .checked_add(stride)
                    .filter(|&next| next < self.block_count)
            },
        )
    }

    /// Addresses of all allocation blocks on the device, in order
    pub fn allocation_blocks(self) -> impl Iterator<Item = u64> {
        (0u64..).map_while(move |index| self.allocation_block_at(index))
    }

    /// Address of the allocation block with the given linear index, if it
    /// exists on the device
    #[must_use]
    pub fn allocation_block_at(&self, index: u64) -> Option<u64> {
        let region = index / self.bits_per_block();
        let slot = index % self.bits_per_block();
        let address = FIRST_ALLOCATION_BLOCK
            .checked_add(region.checked_mul(self.super_stride())?)?
            .checked_add(slot * self.allocation_stride())?;
        (address < self.block_count).then_some(address)
    }

    /// Linear index of an allocation block, or `None` if `address` is not
    /// an allocation-block position
    #[must_use]
    pub fn allocation_block_index(&self, address: u64) -> Option<u64> {
        if address < FIRST_ALLOCATION_BLOCK {
            return None;
        }
        let rem = (address - 1) % self.super_stride();
        if rem == 0 || (rem - 1) % self.allocation_stride() != 0 {
            return None;
        }
        let region = (address - 1) / self.super_stride();
        Some((rem - 1) / self.allocation_stride() + region * self.bits_per_block())
    }

    /// The allocation block tracking `address` and the bit index of
    /// `address` within its bitmap. `None` for structural positions
    /// (header, super blocks, allocation blocks).
    #[must_use]
    pub fn allocation_block_of(&self, address: u64) -> Option<(u64, u64)> {
        if address <= FIRST_ALLOCATION_BLOCK {
            return None;
        }
        let rem = (address - 1) % self.super_stride();
        if rem == 0 {
            return None;
        }
        let offset = (rem - 1) % self.allocation_stride();
        if offset == 0 {
            return None;
        }
        let region = (address - 1) / self.super_stride();
        let slot = (rem - 1) / self.allocation_stride();
        let allocation_block = FIRST_ALLOCATION_BLOCK
            + region * self.super_stride()
            + slot * self.allocation_stride();
        Some((allocation_block, offset - 1))
    }

    /// Address of the super block owning `address`, `None` for block 0
    #[must_use]
    pub fn super_block_of(&self, address: u64) -> Option<u64> {
        if address < FIRST_SUPER_BLOCK {
            return None;
        }
        Some(FIRST_SUPER_BLOCK + (address - 1) / self.super_stride() * self.super_stride())
    }

    /// Address of the allocation block after this one, if on the device
    #[must_use]
    pub fn next_allocation_block(&self, allocation_block: u64) -> Option<u64> {
        self.allocation_block_index(allocation_block)
            .and_then(|index| self.allocation_block_at(index + 1))
    }

    /// Address of the allocation block before this one
    #[must_use]
    pub fn prev_allocation_block(&self, allocation_block: u64) -> Option<u64> {
        self.allocation_block_index(allocation_block)?
            .checked_sub(1)
            .and_then(|index| self.allocation_block_at(index))
    }

    /// How many of an allocation block's tracked positions actually exist
    /// on the device. Less than `bits_per_block()` only for a region
    /// truncated by the device end.
    #[must_use]
    pub fn tracked_blocks(&self, allocation_block: u64) -> u64 {
        self.bits_per_block()
            .min(self.block_count.saturating_sub(allocation_block + 1))
    }

    /// Check whether `address` is a journal header position: the block
    /// right after an allocation block whose linear index falls on the
    /// journal spacing
    #[must_use]
    pub fn is_journal_sector(&self, address: u64) -> bool {
        self.nearest_journal_sector(address) == Some(address)
    }

    /// Journal header position closest to `address`, rounding the owning
    /// region's index to the nearest multiple of `journal_frequency`
    /// (ties round down)
    #[must_use]
    pub fn nearest_journal_sector(&self, address: u64) -> Option<u64> {
        let index = self.region_index_of(address)?;
        let journal_index = if self.journal_frequency == 0 {
            0
        } else {
            let frequency = u64::from(self.journal_frequency);
            let diff = index % frequency;
            let down = index - diff;
            let up = down + frequency;
            if diff > frequency / 2 && self.allocation_block_at(up).is_some() {
                up
            } else {
                down
            }
        };
        self.allocation_block_at(journal_index)
            .map(|allocation_block| allocation_block + 1)
    }

    /// Linear region index owning `address`, accepting both allocation
    /// blocks and the addresses they track
    fn region_index_of(&self, address: u64) -> Option<u64> {
        if address < FIRST_ALLOCATION_BLOCK {
            return None;
        }
        let rem = (address - 1) % self.super_stride();
        if rem == 0 {
            return None;
        }
        let region = (address - 1) / self.super_stride();
        Some((rem - 1) / self.allocation_stride() + region * self.bits_per_block())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(block_count: u64, journal_frequency: u32) -> Geometry {
        Geometry::new(512, block_count, journal_frequency).unwrap()
    }

    #[test]
    fn test_block_size_rule() {
        assert!(is_valid_block_size(512));
        assert!(is_valid_block_size(1024));
        assert!(is_valid_block_size(4096));
        assert!(!is_valid_block_size(0));
        assert!(!is_valid_block_size(256));
        assert!(!is_valid_block_size(513));
        assert!(!is_valid_block_size(8192));
    }

    #[test]
    fn test_header_round_trip() {
        let header = DatabaseHeader::new(
            DatabaseName::new("TestDB").unwrap(),
            512,
            1024,
            64,
        )
        .unwrap();

        let block = header.encode();
        assert_eq!(block.len(), 512);

        let decoded = DatabaseHeader::decode(&block).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.name.as_str(), "TestDB");
        assert_eq!(decoded.block_size, 512);
        assert_eq!(decoded.block_count, 1024);
        assert_eq!(decoded.journal_frequency, 64);
        assert_eq!(decoded.root_object_address, 0);
    }

    #[test]
    fn test_header_magic_on_disk() {
        let header = DatabaseHeader::new(
            DatabaseName::new("db").unwrap(),
            512,
            16,
            0,
        )
        .unwrap();
        let block = header.encode();
        let bytes = block.as_slice();

        assert_eq!(&bytes[..8], &HEADER_MAGIC1.to_le_bytes());
        assert_eq!(&bytes[8..16], &HEADER_MAGIC2.to_le_bytes());
        // Name field is NUL-terminated, trailing bytes zero
        assert_eq!(&bytes[40..42], b"db");
        assert!(bytes[42..40 + NAME_FIELD_LEN].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_header_decode_rejects_bad_magic() {
        let header = DatabaseHeader::new(
            DatabaseName::new("db").unwrap(),
            512,
            16,
            0,
        )
        .unwrap();
        let mut block = header.encode();
        block.as_mut_slice()[0] ^= 0xFF;

        assert!(matches!(
            DatabaseHeader::decode(&block),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_header_decode_rejects_bad_block_size() {
        let header = DatabaseHeader::new(
            DatabaseName::new("db").unwrap(),
            512,
            16,
            0,
        )
        .unwrap();
        let mut block = header.encode();
        // Corrupt the block_size field at offset 16
        block.as_mut_slice()[16..20].copy_from_slice(&100u32.to_le_bytes());

        assert!(matches!(
            DatabaseHeader::decode(&block),
            Err(Error::InvalidBlockSize(100))
        ));
    }

    #[test]
    fn test_strides_for_512() {
        let g = geometry(1024, 64);
        assert_eq!(g.bits_per_block(), 4096);
        assert_eq!(g.allocation_stride(), 4097);
        assert_eq!(g.super_stride(), 4096 * 4097 + 1);
    }

    #[test]
    fn test_super_block_walk() {
        let g = geometry(1024, 64);
        assert_eq!(g.super_blocks().collect::<Vec<_>>(), vec![1]);

        let stride = g.super_stride();
        let g = geometry(2 * stride + 10, 64);
        assert_eq!(
            g.super_blocks().collect::<Vec<_>>(),
            vec![1, 1 + stride, 1 + 2 * stride]
        );
    }

    #[test]
    fn test_allocation_block_walk() {
        let g = geometry(1024, 64);
        assert_eq!(g.allocation_blocks().collect::<Vec<_>>(), vec![2]);

        let g = geometry(9000, 64);
        assert_eq!(
            g.allocation_blocks().collect::<Vec<_>>(),
            vec![2, 4099, 8196]
        );
    }

    #[test]
    fn test_allocation_block_crosses_super_region() {
        // First allocation block of the second super region sits right
        // after the second super block
        let stride = geometry(10, 0).super_stride();
        let g = geometry(2 * stride, 0);
        let address = g.allocation_block_at(g.bits_per_block()).unwrap();
        assert_eq!(address, FIRST_ALLOCATION_BLOCK + stride);
        assert_eq!(g.super_block_of(address), Some(1 + stride));
    }

    #[test]
    fn test_allocation_block_index() {
        let g = geometry(9000, 64);
        assert_eq!(g.allocation_block_index(2), Some(0));
        assert_eq!(g.allocation_block_index(4099), Some(1));
        assert_eq!(g.allocation_block_index(8196), Some(2));
        assert_eq!(g.allocation_block_index(0), None);
        assert_eq!(g.allocation_block_index(1), None);
        assert_eq!(g.allocation_block_index(3), None);
    }

    #[test]
    fn test_allocation_block_of() {
        let g = geometry(9000, 64);
        assert_eq!(g.allocation_block_of(3), Some((2, 0)));
        assert_eq!(g.allocation_block_of(4), Some((2, 1)));
        assert_eq!(g.allocation_block_of(4098), Some((2, 4095)));
        assert_eq!(g.allocation_block_of(4100), Some((4099, 0)));
        // Structural positions have no owner
        assert_eq!(g.allocation_block_of(0), None);
        assert_eq!(g.allocation_block_of(1), None);
        assert_eq!(g.allocation_block_of(2), None);
        assert_eq!(g.allocation_block_of(4099), None);
    }

    #[test]
    fn test_next_prev_allocation_block() {
        let g = geometry(9000, 64);
        assert_eq!(g.next_allocation_block(2), Some(4099));
        assert_eq!(g.next_allocation_block(4099), Some(8196));
        assert_eq!(g.next_allocation_block(8196), None);
        assert_eq!(g.prev_allocation_block(8196), Some(4099));
        assert_eq!(g.prev_allocation_block(2), None);
    }

    #[test]
    fn test_tracked_blocks() {
        let g = geometry(1024, 64);
        assert_eq!(g.tracked_blocks(2), 1021);

        let g = geometry(9000, 64);
        assert_eq!(g.tracked_blocks(2), 4096);
        assert_eq!(g.tracked_blocks(8196), 803);
    }

    #[test]
    fn test_journal_sector_predicate() {
        let g = geometry(9000, 64);
        // Region index 0 is always a journal sector
        assert!(g.is_journal_sector(3));
        assert!(!g.is_journal_sector(4));
        assert!(!g.is_journal_sector(2));
        // Region index 1 is not, at frequency 64
        assert!(!g.is_journal_sector(4100));

        let g = geometry(9000, 1);
        assert!(g.is_journal_sector(4100));
        assert!(g.is_journal_sector(8197));

        let g = geometry(9000, 0);
        assert!(g.is_journal_sector(3));
        assert!(!g.is_journal_sector(4100));
    }

    #[test]
    fn test_nearest_journal_sector_rounds() {
        // Device long enough for allocation index 64 to exist
        let g = geometry(300_000, 64);
        let sector_0 = 3;
        let sector_64 = g.allocation_block_at(64).unwrap() + 1;

        // Region 32 is the tie, rounds down
        let in_region_32 = g.allocation_block_at(32).unwrap() + 5;
        assert_eq!(g.nearest_journal_sector(in_region_32), Some(sector_0));

        // Region 33 is past the midpoint, rounds up
        let in_region_33 = g.allocation_block_at(33).unwrap() + 5;
        assert_eq!(g.nearest_journal_sector(in_region_33), Some(sector_64));
    }

    #[test]
    fn test_nearest_journal_sector_clamps_to_device() {
        // Regions 0..=6 exist; rounding region 5 up to 8 leaves the
        // device, so the nearest sector falls back down
        let g = geometry(25_000, 8);
        let in_region_5 = g.allocation_block_at(5).unwrap() + 9;
        assert_eq!(g.nearest_journal_sector(in_region_5), Some(3));
    }
}
