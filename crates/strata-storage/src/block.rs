//! Block and allocation-bitmap primitives
//!
//! A [`Block`] is the unit of device I/O: an owned, fixed-length byte
//! buffer whose length always equals the device block size. Buffers are
//! allocated with the alignment direct I/O requires, so a `Block` can be
//! handed to the file provider as-is.
//!
//! A [`BlockBitmap`] is the bit-per-block map stored in allocation
//! blocks: bit `i` clear means "block `i` of this region is free", set
//! means "used".

/// Alignment for block buffers. Direct I/O requires the buffer to be
/// aligned to the filesystem block size (512 or 4096 bytes).
pub const BLOCK_ALIGNMENT: usize = 4096;

/// One device block: an owned buffer of exactly the device block size
pub struct Block {
    data: Vec<u8>,
}

impl Block {
    /// Create a zero-filled block of `block_size` bytes
    #[must_use]
    pub fn zeroed(block_size: u32) -> Self {
        Self {
            data: alloc_aligned(block_size as usize),
        }
    }

    /// Create a block holding a copy of `data`
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        let mut block = Self::zeroed(data.len() as u32);
        block.data.copy_from_slice(data);
        block
    }

    /// Length of the block in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the block is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the block contents as a slice
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get the block contents as a mutable slice
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Allocate a zero-filled buffer aligned for direct I/O.
///
/// On Linux the buffer must satisfy O_DIRECT alignment rules, so it is
/// carved out with an explicit layout; the custom `Drop` below returns
/// it with the same layout. Elsewhere a plain `Vec` suffices.
#[cfg(target_os = "linux")]
fn alloc_aligned(size: usize) -> Vec<u8> {
    use std::alloc::{Layout, alloc_zeroed};

    if size == 0 {
        return Vec::new();
    }

    let layout = Layout::from_size_align(size, BLOCK_ALIGNMENT)
        .expect("invalid layout for block buffer");

    unsafe {
        let ptr = alloc_zeroed(layout);
        assert!(!ptr.is_null(), "failed to allocate block buffer");
        Vec::from_raw_parts(ptr, size, size)
    }
}

#[cfg(not(target_os = "linux"))]
fn alloc_aligned(size: usize) -> Vec<u8> {
    vec![0u8; size]
}

#[cfg(target_os = "linux")]
impl Drop for Block {
    fn drop(&mut self) {
        use std::alloc::{Layout, dealloc};

        if !self.data.is_empty() {
            let layout = Layout::from_size_align(self.data.capacity(), BLOCK_ALIGNMENT)
                .expect("invalid layout for block deallocation");

            unsafe {
                let ptr = self.data.as_mut_ptr();
                // The Vec must not free the aligned allocation itself
                std::mem::forget(std::mem::take(&mut self.data));
                dealloc(ptr, layout);
            }
        }
    }
}

impl Clone for Block {
    fn clone(&self) -> Self {
        Self::from_slice(&self.data)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Block {}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Block({} bytes)", self.data.len())
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl AsMut<[u8]> for Block {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Bit-per-block allocation map over an allocation block's payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBitmap {
    bits: Vec<u8>,
    bit_len: usize,
}

impl BlockBitmap {
    /// Create an all-free bitmap tracking `bit_len` blocks
    #[must_use]
    pub fn new(bit_len: usize) -> Self {
        Self {
            bits: vec![0u8; bit_len.div_ceil(8)],
            bit_len,
        }
    }

    /// Reinterpret a block's payload as a bitmap
    #[must_use]
    pub fn from_block(block: &Block) -> Self {
        Self {
            bits: block.as_slice().to_vec(),
            bit_len: block.len() * 8,
        }
    }

    /// Copy the bitmap into a freshly allocated block
    #[must_use]
    pub fn to_block(&self) -> Block {
        Block::from_slice(&self.bits)
    }

    /// Number of blocks the bitmap tracks
    #[must_use]
    pub fn len(&self) -> usize {
        self.bit_len
    }

    /// Check if the bitmap tracks zero blocks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bit_len == 0
    }

    /// Check whether block `index` of the region is marked used.
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn is_used(&self, index: usize) -> bool {
        assert!(index < self.bit_len, "bit index {index} out of bounds");
        self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    /// Mark block `index` of the region used or free.
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, used: bool) {
        assert!(index < self.bit_len, "bit index {index} out of bounds");
        let byte = index / 8;
        let mask = 1 << (index % 8);
        if used {
            self.bits[byte] |= mask;
        } else {
            self.bits[byte] &= !mask;
        }
    }

    /// Mark every tracked block used or free
    pub fn set_all(&mut self, used: bool) {
        self.bits.fill(if used { 0xFF } else { 0 });
        if used {
            self.mask_tail();
        }
    }

    /// Check if every tracked block is marked used
    #[must_use]
    pub fn all_used(&self) -> bool {
        let full = self.bit_len / 8;
        if self.bits[..full].iter().any(|&b| b != 0xFF) {
            return false;
        }
        match self.tail_mask() {
            Some(mask) => self.bits[full] & mask == mask,
            None => true,
        }
    }

    /// Check if every tracked block is marked free
    #[must_use]
    pub fn all_free(&self) -> bool {
        // Bits past `bit_len` are never set, plain byte scan suffices
        self.bits.iter().all(|&b| b == 0)
    }

    /// Number of blocks currently marked used
    #[must_use]
    pub fn count_used(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Number of complete 64-bit words in the map, for coarse scans
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.bits.len() / 8
    }

    /// Check if the 64 blocks of word `word` are all used.
    /// Panics if `word >= word_count()`.
    #[must_use]
    pub fn is_word_used(&self, word: usize) -> bool {
        self.word(word) == u64::MAX
    }

    /// Check if the 64 blocks of word `word` are all free.
    /// Panics if `word >= word_count()`.
    #[must_use]
    pub fn is_word_free(&self, word: usize) -> bool {
        self.word(word) == 0
    }

    /// Raw bitmap bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn word(&self, word: usize) -> u64 {
        let start = word * 8;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.bits[start..start + 8]);
        u64::from_le_bytes(bytes)
    }

    /// Mask of valid bits in the final partial byte, if any
    fn tail_mask(&self) -> Option<u8> {
        match self.bit_len % 8 {
            0 => None,
            rem => Some((1 << rem) - 1),
        }
    }

    fn mask_tail(&mut self) {
        if let Some(mask) = self.tail_mask() {
            let last = self.bits.len() - 1;
            self.bits[last] &= mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_zeroed() {
        let block = Block::zeroed(512);
        assert_eq!(block.len(), 512);
        assert!(block.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_block_alignment() {
        let block = Block::zeroed(512);
        assert_eq!(block.as_slice().as_ptr() as usize % BLOCK_ALIGNMENT, 0);
    }

    #[test]
    fn test_block_from_slice_and_clone() {
        let data: Vec<u8> = (0..=255).cycle().take(1024).collect();
        let block = Block::from_slice(&data);
        assert_eq!(block.as_slice(), &data[..]);

        let mut copy = block.clone();
        copy.as_mut_slice()[0] = 0xAA;
        assert_ne!(copy, block);
        assert_eq!(block.as_slice()[0], 0);
    }

    #[test]
    fn test_bitmap_set_and_get() {
        let mut bitmap = BlockBitmap::new(4096);
        assert!(!bitmap.is_used(100));

        bitmap.set(100, true);
        assert!(bitmap.is_used(100));
        assert!(!bitmap.is_used(99));
        assert!(!bitmap.is_used(101));
        assert_eq!(bitmap.count_used(), 1);

        bitmap.set(100, false);
        assert!(bitmap.all_free());
    }

    #[test]
    fn test_bitmap_set_all() {
        let mut bitmap = BlockBitmap::new(512);
        assert!(bitmap.all_free());
        assert!(!bitmap.all_used());

        bitmap.set_all(true);
        assert!(bitmap.all_used());
        assert!(!bitmap.all_free());
        assert_eq!(bitmap.count_used(), 512);

        bitmap.set_all(false);
        assert!(bitmap.all_free());
    }

    #[test]
    fn test_bitmap_word_scans() {
        let mut bitmap = BlockBitmap::new(4096);
        assert_eq!(bitmap.word_count(), 64);
        assert!(bitmap.is_word_free(0));
        assert!(!bitmap.is_word_used(0));

        for bit in 64..128 {
            bitmap.set(bit, true);
        }
        assert!(bitmap.is_word_used(1));
        assert!(bitmap.is_word_free(0));
        assert!(bitmap.is_word_free(2));

        bitmap.set(64, false);
        assert!(!bitmap.is_word_used(1));
        assert!(!bitmap.is_word_free(1));
    }

    #[test]
    fn test_bitmap_partial_tail() {
        let mut bitmap = BlockBitmap::new(13);
        bitmap.set_all(true);
        assert!(bitmap.all_used());
        assert_eq!(bitmap.count_used(), 13);

        bitmap.set(12, false);
        assert!(!bitmap.all_used());
    }

    #[test]
    fn test_bitmap_block_round_trip() {
        let mut bitmap = BlockBitmap::new(512 * 8);
        bitmap.set(0, true);
        bitmap.set(7, true);
        bitmap.set(4095, true);

        let block = bitmap.to_block();
        assert_eq!(block.len(), 512);

        let decoded = BlockBitmap::from_block(&block);
        assert_eq!(decoded, bitmap);
        assert!(decoded.is_used(0));
        assert!(decoded.is_used(7));
        assert!(decoded.is_used(4095));
        assert_eq!(decoded.count_used(), 3);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_bitmap_out_of_bounds() {
        let bitmap = BlockBitmap::new(8);
        let _ = bitmap.is_used(8);
    }
}
