//! Type-aware write-through block cache
//!
//! Callers tag every transfer with the structural role of the block
//! ([`BlockType`]); the cache mirrors cacheable writes into memory and then
//! forwards them to the underlying [`Provider`], so the device is always as
//! current as the cache. Journal blocks are structurally excluded: recovery
//! reads must always hit the device. Eviction ranking lives in [`LruPolicy`];
//! a [`PassthroughPolicy`] turns the cache into a plain forwarder.

use crate::block::Block;
use crate::provider::Provider;

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_common::{Error, Result};
use tracing::trace;

/// Structural role of a block, as declared by the layer issuing the I/O.
///
/// The role never travels to the device; it only steers caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    /// Allocation bitmap block
    AllocationBlock,
    /// Node header block
    NodeHeaderBlock,
    /// Typed stream header
    TypedStreamHeader,
    /// B+tree versions block
    BPlusTreeVersionsBlock,
    /// B+tree children block
    BPlusTreeChildrenBlock,
    /// B+tree node block
    BPlusTreeBlock,
    /// Object payload data
    ObjectData,
    /// Payload data of an object too large for inline storage
    BigObjectData,
    /// Allocation bitmap block of a journal sector
    JournalSectorBlock,
    /// Journal data block, never cached
    JournalBlock,
    /// Role not known to the caller
    Unknown,
    /// Explicit request to bypass the cache for this transfer
    NoCache,
}

impl BlockType {
    /// Whether blocks of this type may be held in the cache
    #[must_use]
    pub const fn is_cacheable(self) -> bool {
        !matches!(self, Self::JournalBlock | Self::NoCache)
    }
}

/// Cache key: the same address cached under two types is two entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub block_type: BlockType,
    pub address: u64,
}

/// Storage strategy behind a [`BlockCache`].
///
/// Policies only see already-filtered traffic: the cache never offers a
/// non-cacheable block to its policy.
pub trait CachePolicy: Send + Sync {
    /// Remember `data` under `key`, evicting if the policy is full
    fn store(&self, key: CacheKey, data: Bytes);

    /// Look up `key`, refreshing its recency
    fn load(&self, key: CacheKey) -> Option<Bytes>;

    /// Number of cached entries
    fn len(&self) -> u64;

    /// Drop every cached entry
    fn clear(&self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Policy that caches nothing; every read goes to the device
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughPolicy;

impl CachePolicy for PassthroughPolicy {
    fn store(&self, _key: CacheKey, _data: Bytes) {}

    fn load(&self, _key: CacheKey) -> Option<Bytes> {
        None
    }

    fn len(&self) -> u64 {
        0
    }

    fn clear(&self) {}
}

struct CacheEntry {
    data: Bytes,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn touch(&self, stamp: u64) {
        self.last_access.store(stamp, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// Eviction rank: `None` pins the entry, lower ranks are evicted sooner.
///
/// Node headers are the hottest blocks in the tree and stay pinned.
/// Object payloads are the least likely to be re-read and go first.
const fn eviction_class(block_type: BlockType) -> Option<u8> {
    match block_type {
        BlockType::NodeHeaderBlock => None,
        BlockType::ObjectData | BlockType::BigObjectData => Some(0),
        _ => Some(1),
    }
}

/// Least-recently-used policy with a fixed entry capacity.
///
/// Recency is a logical clock stamped on every load and store. A capacity
/// of zero disables caching entirely.
pub struct LruPolicy {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    capacity: usize,
    clock: AtomicU64,
    evictions: AtomicU64,
}

impl LruPolicy {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            clock: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of entries evicted since creation
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn next_stamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Remove the lowest-ranked, least-recently-used evictable entry.
    /// Returns false when every resident entry is pinned.
    fn evict_one(&self, entries: &mut HashMap<CacheKey, CacheEntry>) -> bool {
        let victim = entries
            .iter()
            .filter_map(|(key, entry)| {
                eviction_class(key.block_type).map(|class| ((class, entry.last_access()), *key))
            })
            .min_by_key(|(rank, _)| *rank);

        match victim {
            Some((_, key)) => {
                entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

impl CachePolicy for LruPolicy {
    fn store(&self, key: CacheKey, data: Bytes) {
        let stamp = self.next_stamp();
        let mut entries = self.entries.write();

        if !entries.contains_key(&key)
            && entries.len() >= self.capacity
            && !self.evict_one(&mut entries)
        {
            trace!(?key, "cache full of pinned entries, not caching");
            return;
        }

        entries.insert(
            key,
            CacheEntry {
                data,
                last_access: AtomicU64::new(stamp),
            },
        );
    }

    fn load(&self, key: CacheKey) -> Option<Bytes> {
        let entries = self.entries.read();
        let entry = entries.get(&key)?;
        entry.touch(self.next_stamp());
        Some(entry.data.clone())
    }

    fn len(&self) -> u64 {
        self.entries.read().len() as u64
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Instantaneous snapshot of cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Cacheable reads served from memory
    pub hits: u64,
    /// Cacheable reads that went to the device
    pub misses: u64,
}

impl CacheStats {
    #[must_use]
    pub const fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        if self.lookups() == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups() as f64
        }
    }
}

/// Write-through cache in front of a [`Provider`].
///
/// Writes land on the device before the call returns; the cache only
/// short-circuits reads. Bypassing the cache via [`BlockCache::provider_mut`]
/// does not invalidate entries already cached.
pub struct BlockCache<P: Provider> {
    provider: P,
    policy: Box<dyn CachePolicy>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P: Provider> BlockCache<P> {
    pub fn new(provider: P, policy: Box<dyn CachePolicy>) -> Self {
        Self {
            provider,
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache that forwards everything to the device
    pub fn passthrough(provider: P) -> Self {
        Self::new(provider, Box::new(PassthroughPolicy))
    }

    /// Cache holding up to `capacity` blocks under LRU eviction
    pub fn with_lru(provider: P, capacity: usize) -> Self {
        Self::new(provider, Box::new(LruPolicy::new(capacity)))
    }

    /// Write a block through to the device, mirroring it in the cache
    /// when its type is cacheable.
    pub fn write(&mut self, block_type: BlockType, address: u64, block: &Block) -> Result<()> {
        if block.len() != self.provider.block_size() as usize {
            return Err(Error::WrongBlockLength {
                expected: self.provider.block_size(),
                actual: block.len(),
            });
        }

        if block_type.is_cacheable() {
            let key = CacheKey {
                block_type,
                address,
            };
            self.policy.store(key, Bytes::copy_from_slice(block.as_slice()));
        }

        self.provider.write(address, block)
    }

    /// Read a block, serving it from memory when cached.
    ///
    /// A device read that finds the block missing (`Ok(None)`) passes
    /// through unchanged and caches nothing.
    pub fn read(&self, block_type: BlockType, address: u64) -> Result<Option<Block>> {
        if !block_type.is_cacheable() {
            return self.provider.read(address);
        }

        let key = CacheKey {
            block_type,
            address,
        };
        if let Some(data) = self.policy.load(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(Block::from_slice(&data)));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let block = self.provider.read(address)?;
        if let Some(ref block) = block {
            self.policy
                .store(key, Bytes::copy_from_slice(block.as_slice()));
        }
        Ok(block)
    }

    /// Number of blocks currently held in memory
    pub fn cached_block_count(&self) -> u64 {
        self.policy.len()
    }

    /// Drop every cached block; the device is untouched
    pub fn clear(&self) {
        self.policy.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.provider.block_size()
    }

    pub fn block_count(&self) -> u64 {
        self.provider.block_count()
    }

    pub fn physical_location(&self, address: u64) -> String {
        self.provider.physical_location(address)
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Direct access to the device; cached copies are not invalidated
    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    pub fn into_inner(self) -> P {
        self.provider
    }
}
