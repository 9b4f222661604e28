//! Fixed-block event pools.
//!
//! An [`EventPool`] hands out blocks of one size from a free list carved at
//! construction. Allocation never blocks: [`EventPool::get`] fails when taking
//! a block would leave fewer than `margin` free blocks, which lets low-priority
//! producers be refused while a reserve stays available for urgent ones.
//!
//! Pools are registered in a [`PoolSet`] in increasing block-size order and an
//! allocation is served by the first pool whose blocks are large enough.
//! Blocks taken for an event are held by a [`BlockLease`] and come back to
//! their pool when the last reference to the event is dropped.
//!
//! A block is an admission token, not storage. The event payload lives in its
//! own heap allocation; the pool only bounds how many events of each size
//! class may be alive at once, so exhaustion and margins behave as on a
//! target where the block would hold the event itself.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::sync::Weak;

/// Index of a block inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pool statistics for sizing and monitoring.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub block_size: usize,
    pub total_blocks: usize,
    pub free_blocks: usize,
    /// Fewest free blocks ever observed.
    pub min_free_blocks: usize,
}

impl PoolStats {
    pub const fn used_blocks(&self) -> usize {
        self.total_blocks - self.free_blocks
    }

    /// Utilization as a percentage (0-100).
    pub fn utilization(&self) -> u8 {
        if self.total_blocks == 0 {
            0
        } else {
            ((self.used_blocks() * 100) / self.total_blocks) as u8
        }
    }
}

pub struct EventPool {
    block_size: usize,
    free: Vec<u32>,
    in_use: Vec<bool>,
    min_free: usize,
}

impl EventPool {
    /// Carves a pool of `n_blocks` blocks of `block_size` bytes.
    pub fn new(n_blocks: usize, block_size: usize) -> Self {
        assert!(n_blocks > 0, "event pool must hold at least one block");
        assert!(block_size > 0, "event pool block size must be non-zero");
        assert!(
            n_blocks <= u32::MAX as usize,
            "event pool of {n_blocks} blocks exceeds the block index range"
        );
        // lowest index on top of the stack
        let free = (0..n_blocks as u32).rev().collect();
        Self {
            block_size,
            free,
            in_use: vec![false; n_blocks],
            min_free: n_blocks,
        }
    }

    /// Takes one block if more than `margin` blocks are free.
    pub fn get(&mut self, margin: usize) -> Option<BlockId> {
        if self.free.len() <= margin {
            return None;
        }
        let index = self.free.pop()?;
        self.in_use[index as usize] = true;
        self.min_free = self.min_free.min(self.free.len());
        Some(BlockId(index))
    }

    /// Returns a block obtained from [`EventPool::get`].
    pub fn put(&mut self, block: BlockId) {
        let slot = self.in_use.get_mut(block.index()).unwrap_or_else(|| {
            fatal!("block {} does not belong to this event pool", block.0)
        });
        if !*slot {
            fatal!("block {} returned to its event pool twice", block.0);
        }
        *slot = false;
        self.free.push(block.0);
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn n_total(&self) -> usize {
        self.in_use.len()
    }

    pub fn n_free(&self) -> usize {
        self.free.len()
    }

    pub fn n_min(&self) -> usize {
        self.min_free
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            block_size: self.block_size,
            total_blocks: self.n_total(),
            free_blocks: self.n_free(),
            min_free_blocks: self.min_free,
        }
    }
}

impl fmt::Debug for EventPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPool")
            .field("block_size", &self.block_size)
            .field("n_total", &self.n_total())
            .field("n_free", &self.n_free())
            .field("n_min", &self.min_free)
            .finish()
    }
}

/// Event pools ordered by strictly increasing block size.
///
/// Pool identifiers are 1-based, matching the order of registration.
#[derive(Debug, Default)]
pub struct PoolSet {
    pools: Vec<EventPool>,
}

impl PoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `pool` and returns its identifier.
    ///
    /// Panics if `pool` does not have larger blocks than the last pool.
    pub fn push(&mut self, pool: EventPool) -> u8 {
        if let Some(last) = self.pools.last() {
            assert!(
                pool.block_size() > last.block_size(),
                "event pools must be registered in increasing block-size order"
            );
        }
        self.pools.push(pool);
        self.pools.len() as u8
    }

    /// First pool able to hold an event of `size` bytes.
    pub fn select(&self, size: usize) -> Option<u8> {
        self.pools
            .iter()
            .position(|pool| size <= pool.block_size())
            .map(|index| index as u8 + 1)
    }

    pub fn get(&mut self, pool_id: u8, margin: usize) -> Option<BlockId> {
        self.pool_mut(pool_id).get(margin)
    }

    pub fn put(&mut self, pool_id: u8, block: BlockId) {
        self.pool_mut(pool_id).put(block);
    }

    pub fn pool(&self, pool_id: u8) -> Option<&EventPool> {
        self.pools.get((pool_id as usize).checked_sub(1)?)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    fn pool_mut(&mut self, pool_id: u8) -> &mut EventPool {
        let index = (pool_id as usize).wrapping_sub(1);
        match self.pools.get_mut(index) {
            Some(pool) => pool,
            None => fatal!("event pool id {pool_id} is not registered"),
        }
    }
}

/// Receives blocks released by the last owner of a pool event.
pub trait BlockRecycler: Send + Sync {
    fn recycle(&self, pool_id: u8, block: BlockId);
}

/// Ownership of one pool block for the lifetime of an event.
///
/// Shared by every clone of the event; the block goes back to its pool when
/// the lease is dropped. If the owning kernel is already gone the block is
/// simply forgotten.
pub struct BlockLease {
    pool_id: u8,
    block: BlockId,
    recycler: Weak<dyn BlockRecycler>,
}

impl BlockLease {
    pub fn new(pool_id: u8, block: BlockId, recycler: Weak<dyn BlockRecycler>) -> Self {
        Self {
            pool_id,
            block,
            recycler,
        }
    }

    pub fn pool_id(&self) -> u8 {
        self.pool_id
    }

    pub fn block(&self) -> BlockId {
        self.block
    }
}

impl Drop for BlockLease {
    fn drop(&mut self) {
        if let Some(recycler) = self.recycler.upgrade() {
            recycler.recycle(self.pool_id, self.block);
        }
    }
}

impl fmt::Debug for BlockLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockLease")
            .field("pool_id", &self.pool_id)
            .field("block", &self.block)
            .finish()
    }
}
