use core::fmt;
use std::collections::BTreeMap;

use log::{debug, trace};

use crate::block::{Block, HEADER_SIZE};
use crate::error::PoolError;
use crate::strategy::Strategy;

/// The opaque reference returned by a successful allocation.
///
/// A handle is a byte offset of a payload region inside the pool. It is
/// never dereferenced on trust: every use scans the live chain for a block
/// whose payload starts there, so a handle kept across a [`Pool::reset`]
/// fails with [`PoolError::UnknownHandle`] instead of corrupting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub(crate) usize);

/// A fixed-size memory pool carved into a chain of variable-size blocks.
///
/// The pool owns a contiguous byte buffer, logically partitioned into
/// blocks: each block's header is followed by its payload, and the next
/// header begins immediately after. The chain is gapless and exhaustive —
/// the headers and payloads of all blocks always add up to exactly the
/// configured pool size.
///
/// Allocation delegates the search to a [`Strategy`]; splitting, merging
/// and statistics are shared. Freed blocks are merged forward (and only
/// forward) with free successors.
#[derive(Debug)]
pub struct Pool {
    strategy: Strategy,
    buf: Vec<u8>,
    blocks: BTreeMap<usize, Block>,
    used: usize,
    peak: usize,
    failed_allocations: usize,
}

/// Iterator over the block chain, in address order, following `next` links.
pub struct Blocks<'pool> {
    blocks: &'pool BTreeMap<usize, Block>,
    cursor: Option<usize>,
}

impl<'pool> Iterator for Blocks<'pool> {
    type Item = &'pool Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.blocks.get(&self.cursor.take()?)?;
        self.cursor = block.next();
        Some(block)
    }
}

/// All invalid states an [`audit`](Pool::audit) can find in a pool.
///
/// A valid pool has every counter at zero; anything else means an
/// invariant was broken.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Validity {
    /// Bytes by which the chain's coverage (headers plus payloads) misses
    /// the configured pool size.
    pub coverage_gap: usize,
    /// Number of `next` links that do not land immediately after the
    /// current block's payload.
    pub broken_links: usize,
    /// Bytes by which the used-size ledger disagrees with the sum of
    /// header-plus-payload over used blocks.
    pub ledger_drift: usize,
}

impl Validity {
    /// A simple check that all counters are 0.
    pub fn is_valid(&self) -> bool {
        self.coverage_gap == 0 && self.broken_links == 0 && self.ledger_drift == 0
    }
}

/// Aggregate numbers about the chain, computed alongside [`Validity`].
///
/// `adjacent_free` counts chain-adjacent pairs that are both free. Merging
/// is forward-only, so such pairs are reachable (free a block, then free
/// its predecessor) and count as fragmentation, not corruption.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ChainStats {
    pub blocks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
    pub adjacent_free: usize,
}

impl Pool {
    /// Create a pool of `total_size` bytes, managed by `strategy`, holding
    /// a single free block spanning everything after the head header.
    pub fn new(strategy: Strategy, total_size: usize) -> Result<Pool, PoolError> {
        if total_size < HEADER_SIZE {
            return Err(PoolError::PoolTooSmall {
                requested: total_size,
            });
        }

        Ok(Pool {
            strategy,
            buf: vec![0; total_size],
            blocks: Self::initial_chain(total_size),
            used: 0,
            peak: 0,
            failed_allocations: 0,
        })
    }

    fn initial_chain(total_size: usize) -> BTreeMap<usize, Block> {
        let mut blocks = BTreeMap::new();
        blocks.insert(0, Block::new(0, total_size - HEADER_SIZE));
        blocks
    }

    /// Allocate `size` payload bytes and return a handle to them, or
    /// `Ok(None)` if no free block can satisfy the request.
    ///
    /// Exhaustion is a reportable outcome, not an error: it bumps
    /// [`failed_allocations`](Pool::failed_allocations) and the caller is
    /// expected to branch on the `None`. A `size` of zero is rejected
    /// before anything is searched.
    pub fn allocate(&mut self, size: usize) -> Result<Option<Handle>, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidArgument(
                "requested allocation size must be positive",
            ));
        }

        let offset = match self.strategy.find(self.blocks(), size) {
            Some(offset) => offset,
            None => {
                debug!("no free block fits {} bytes", size);
                self.failed_allocations += 1;
                return Ok(None);
            }
        };

        let found_size = self.block_at(offset).size();
        let did_split = if found_size >= size + HEADER_SIZE {
            self.split_block(offset, size)
        } else {
            false
        };

        if !did_split {
            // The whole block is consumed, slack included.
            self.block_at_mut(offset).set_free(false);
        }

        // Shared bookkeeping rule: a split charges exactly what was asked
        // for, an unsplit block charges its entire payload.
        let charged = if did_split {
            size + HEADER_SIZE
        } else {
            found_size + HEADER_SIZE
        };
        self.used += charged;
        if self.used > self.peak {
            self.peak = self.used;
        }

        debug!(
            "allocated {} bytes at offset {} (charged {})",
            size,
            offset + HEADER_SIZE,
            charged
        );
        Ok(Some(Handle(offset + HEADER_SIZE)))
    }

    /// Carve a used block of exactly `size` bytes out of the free block at
    /// `offset`, leaving the remainder as a new free block wired into the
    /// chain in its place.
    ///
    /// Returns `false` without touching anything when the remainder could
    /// not hold a header's worth of payload; the caller must then consume
    /// the block whole.
    fn split_block(&mut self, offset: usize, size: usize) -> bool {
        debug_assert!(size > 0, "split size must be positive");

        let block = self.block_at(offset);
        let remaining = match block.size().checked_sub(size + HEADER_SIZE) {
            Some(remaining) if remaining >= HEADER_SIZE => remaining,
            _ => return false,
        };
        let old_next = block.next();

        let new_offset = offset + HEADER_SIZE + size;
        let mut tail = Block::new(new_offset, remaining);
        tail.set_next(old_next)
            .expect("successor lies beyond the split point");

        let head = self.block_at_mut(offset);
        head.set_size(size);
        head.set_free(false);
        head.set_next(Some(new_offset))
            .expect("split point lies beyond the block header");

        trace!(
            "split block at {}: {} used + {} free at {}",
            offset,
            size,
            remaining,
            new_offset
        );
        self.blocks.insert(new_offset, tail);
        true
    }

    /// Release the payload behind `handle` back to the pool.
    ///
    /// `None` and handles to already-free blocks are no-ops. A handle whose
    /// payload start matches no block in the live chain does not belong to
    /// this pool and fails with [`PoolError::UnknownHandle`].
    pub fn deallocate(&mut self, handle: Option<Handle>) -> Result<(), PoolError> {
        let handle = match handle {
            None => return Ok(()),
            Some(handle) => handle,
        };

        let offset = self
            .blocks()
            .find(|block| block.payload_offset() == handle.0)
            .map(Block::offset)
            .ok_or(PoolError::UnknownHandle(handle))?;

        let block = self.block_at(offset);
        if block.is_free() {
            // Freeing twice is tolerated and changes nothing.
            return Ok(());
        }

        self.used -= HEADER_SIZE + block.size();
        self.block_at_mut(offset).set_free(true);
        debug!("deallocated block at offset {}", offset);
        self.merge_forward(offset);
        Ok(())
    }

    /// Absorb free successors into the block at `offset`, one at a time,
    /// stopping at the first used successor or the end of the chain. The
    /// predecessor is never considered.
    fn merge_forward(&mut self, offset: usize) {
        loop {
            let block = self.block_at(offset);
            let next_offset = match block.next() {
                Some(next_offset) => next_offset,
                None => return,
            };
            let next = self.block_at(next_offset);
            if !next.is_free() {
                return;
            }

            let absorbed = next.size();
            let after = next.next();
            self.blocks.remove(&next_offset);

            let block = self.block_at_mut(offset);
            block.set_size(block.size() + HEADER_SIZE + absorbed);
            block
                .set_next(after)
                .expect("merged successor cannot precede its block");
            trace!(
                "merged block at {} into {}, now {} bytes",
                next_offset,
                offset,
                self.block_at(offset).size()
            );
        }
    }

    /// Throw away the current buffer and chain and start over with
    /// `total_size` bytes and zeroed statistics.
    ///
    /// The size check happens before anything is torn down, so a failed
    /// reset leaves the previous chain and statistics fully intact.
    pub fn reset(&mut self, total_size: usize) -> Result<(), PoolError> {
        if total_size < HEADER_SIZE {
            return Err(PoolError::PoolTooSmall {
                requested: total_size,
            });
        }

        self.buf = vec![0; total_size];
        self.blocks = Self::initial_chain(total_size);
        self.used = 0;
        self.peak = 0;
        self.failed_allocations = 0;
        debug!("pool reset to {} bytes", total_size);
        Ok(())
    }

    /// Total pool size in bytes.
    pub fn total_memory(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently charged as used, headers and unsplit slack included.
    pub fn used_memory(&self) -> usize {
        self.used
    }

    /// Bytes not currently charged as used.
    pub fn free_memory(&self) -> usize {
        self.total_memory() - self.used
    }

    /// High-water mark of [`used_memory`](Pool::used_memory).
    pub fn peak_usage(&self) -> usize {
        self.peak
    }

    /// Number of allocate calls that found no fitting block.
    pub fn failed_allocations(&self) -> usize {
        self.failed_allocations
    }

    /// Name of the active placement strategy.
    pub fn algorithm_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// The active placement strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Read-only view of the head block.
    pub fn head(&self) -> &Block {
        self.block_at(0)
    }

    /// Iterate over the chain in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            blocks: &self.blocks,
            cursor: Some(0),
        }
    }

    /// Borrow the payload bytes behind `handle`.
    pub fn payload(&self, handle: Handle) -> Result<&[u8], PoolError> {
        let block = self
            .blocks()
            .find(|block| block.payload_offset() == handle.0)
            .ok_or(PoolError::UnknownHandle(handle))?;
        Ok(&self.buf[handle.0..handle.0 + block.size()])
    }

    /// Mutably borrow the payload bytes behind `handle`.
    pub fn payload_mut(&mut self, handle: Handle) -> Result<&mut [u8], PoolError> {
        let size = self
            .blocks()
            .find(|block| block.payload_offset() == handle.0)
            .map(Block::size)
            .ok_or(PoolError::UnknownHandle(handle))?;
        Ok(&mut self.buf[handle.0..handle.0 + size])
    }

    /// Walk the whole chain, checking every structural invariant and
    /// collecting aggregate numbers.
    pub fn audit(&self) -> (Validity, ChainStats) {
        let mut validity = Validity::default();
        let mut stats = ChainStats::default();

        let mut covered = 0;
        let mut charged = 0;
        let mut previous_free = false;
        for block in self.blocks() {
            let end = block.offset() + HEADER_SIZE + block.size();
            covered += HEADER_SIZE + block.size();

            match block.next() {
                Some(next) if next != end => validity.broken_links += 1,
                _ => {}
            }

            if block.is_free() {
                if previous_free {
                    stats.adjacent_free += 1;
                }
                stats.free_blocks += 1;
                stats.free_bytes += block.size();
                stats.largest_free = stats.largest_free.max(block.size());
            } else {
                charged += HEADER_SIZE + block.size();
            }

            stats.blocks += 1;
            previous_free = block.is_free();
        }

        validity.coverage_gap = covered.abs_diff(self.total_memory());
        validity.ledger_drift = charged.abs_diff(self.used);

        (validity, stats)
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Algorithm: {}", self.algorithm_name())?;
        writeln!(f, "Total Memory: {}", self.total_memory())?;
        writeln!(f, "Used Memory: {}", self.used_memory())?;
        writeln!(f, "Free Memory: {}", self.free_memory())?;
        writeln!(f, "Peak Usage: {}", self.peak_usage())?;
        writeln!(f, "Failed Allocations: {}", self.failed_allocations())?;

        for (index, block) in self.blocks().enumerate() {
            writeln!(f, "Block {}: {}", index, block)?;
        }

        Ok(())
    }
}

impl Pool {
    fn block_at(&self, offset: usize) -> &Block {
        self.blocks
            .get(&offset)
            .expect("chain offsets always resolve to a block")
    }

    fn block_at_mut(&mut self, offset: usize) -> &mut Block {
        self.blocks
            .get_mut(&offset)
            .expect("chain offsets always resolve to a block")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn assert_valid(pool: &Pool) {
        let (validity, _stats) = pool.audit();
        assert!(validity.is_valid(), "invalid pool: {:?}", validity);
    }

    #[test]
    fn construction_installs_one_free_block() {
        let pool = Pool::new(Strategy::FirstFit, 300).unwrap();
        assert_eq!(pool.total_memory(), 300);
        assert_eq!(pool.used_memory(), 0);
        assert_eq!(pool.free_memory(), 300);
        assert_eq!(pool.peak_usage(), 0);
        assert_eq!(pool.failed_allocations(), 0);

        let head = pool.head();
        assert!(head.is_free());
        assert_eq!(head.next(), None);
        assert_eq!(head.size() + HEADER_SIZE, 300);
        assert_valid(&pool);
    }

    #[test]
    fn construction_rejects_tiny_pool() {
        let err = Pool::new(Strategy::FirstFit, HEADER_SIZE - 1).unwrap_err();
        assert_eq!(err, PoolError::PoolTooSmall {
            requested: HEADER_SIZE - 1,
        });
    }

    #[test]
    fn zero_size_allocation_is_rejected() {
        let mut pool = Pool::new(Strategy::FirstFit, 300).unwrap();
        let err = pool.allocate(0).unwrap_err();
        assert!(matches!(err, PoolError::InvalidArgument(_)));
        // Validation precedes mutation: nothing changed.
        assert_eq!(pool.failed_allocations(), 0);
        assert_eq!(pool.used_memory(), 0);
    }

    // The 300-byte scenario: 112 and 96 fit, 80 does not, and freeing
    // everything merges back into a single block spanning the pool.
    #[test]
    fn fill_fail_and_drain() {
        let mut pool = Pool::new(Strategy::FirstFit, 300).unwrap();

        let p1 = pool.allocate(112).unwrap();
        assert!(p1.is_some());
        assert_eq!(pool.used_memory(), 112 + HEADER_SIZE);
        assert_valid(&pool);

        let p2 = pool.allocate(96).unwrap();
        assert!(p2.is_some());
        assert_eq!(pool.used_memory(), 112 + 96 + 2 * HEADER_SIZE);
        assert_valid(&pool);

        // 44 bytes left in the tail block; 80 cannot fit.
        let p3 = pool.allocate(80).unwrap();
        assert_eq!(p3, None);
        assert_eq!(pool.failed_allocations(), 1);

        pool.deallocate(p2).unwrap();
        pool.deallocate(p1).unwrap();
        assert_valid(&pool);

        let head = pool.head();
        assert!(head.is_free());
        assert_eq!(head.next(), None);
        assert_eq!(head.size(), 300 - HEADER_SIZE);
        assert_eq!(pool.used_memory(), 0);
        // Peak and failure counts survive deallocation.
        assert_eq!(pool.peak_usage(), 112 + 96 + 2 * HEADER_SIZE);
        assert_eq!(pool.failed_allocations(), 1);
    }

    #[test]
    fn allocate_then_free_restores_everything() {
        let mut pool = Pool::new(Strategy::BestFit, 512).unwrap();
        let before = pool.used_memory();

        let handle = pool.allocate(100).unwrap();
        pool.deallocate(handle).unwrap();

        assert_eq!(pool.used_memory(), before);
        let head = pool.head();
        assert!(head.is_free());
        assert_eq!(head.next(), None);
        assert_eq!(head.size(), 512 - HEADER_SIZE);
        assert_valid(&pool);
    }

    #[test]
    fn deallocate_is_idempotent() {
        let mut pool = Pool::new(Strategy::FirstFit, 512).unwrap();
        let p1 = pool.allocate(100).unwrap();
        let p2 = pool.allocate(100).unwrap();
        pool.deallocate(p1).unwrap();

        let used = pool.used_memory();
        let peak = pool.peak_usage();
        let shape: Vec<_> = pool.blocks().cloned().collect();

        // Freeing None and freeing an already-free block change nothing.
        pool.deallocate(None).unwrap();
        pool.deallocate(p1).unwrap();

        assert_eq!(pool.used_memory(), used);
        assert_eq!(pool.peak_usage(), peak);
        assert_eq!(pool.blocks().cloned().collect::<Vec<_>>(), shape);

        pool.deallocate(p2).unwrap();
        assert_valid(&pool);
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let mut pool = Pool::new(Strategy::FirstFit, 512).unwrap();
        let _ = pool.allocate(100).unwrap();

        let bogus = Handle(3);
        assert_eq!(
            pool.deallocate(Some(bogus)),
            Err(PoolError::UnknownHandle(bogus))
        );
        assert_eq!(pool.payload(bogus), Err(PoolError::UnknownHandle(bogus)));
    }

    #[test]
    fn stale_handle_after_reset_is_rejected() {
        let mut pool = Pool::new(Strategy::FirstFit, 512).unwrap();
        let _ = pool.allocate(100).unwrap();
        // The second payload starts past the fresh chain's only payload
        // start, so it is guaranteed stale after the reset.
        let stale = pool.allocate(100).unwrap().unwrap();
        pool.reset(512).unwrap();

        assert_eq!(
            pool.deallocate(Some(stale)),
            Err(PoolError::UnknownHandle(stale))
        );
        // A stale handle that happens to land on the free head block is a
        // no-op, never corruption.
        pool.deallocate(Some(Handle(HEADER_SIZE))).unwrap();
        assert_eq!(pool.used_memory(), 0);
        assert_valid(&pool);
    }

    #[test]
    fn reset_too_small_preserves_state() {
        let mut pool = Pool::new(Strategy::WorstFit, 512).unwrap();
        let _ = pool.allocate(100).unwrap();
        let _ = pool.allocate(600).unwrap(); // fails, bumps the counter

        let used = pool.used_memory();
        let dump = pool.to_string();

        let err = pool.reset(HEADER_SIZE - 1).unwrap_err();
        assert_eq!(err, PoolError::PoolTooSmall {
            requested: HEADER_SIZE - 1,
        });

        assert_eq!(pool.used_memory(), used);
        assert_eq!(pool.failed_allocations(), 1);
        assert_eq!(pool.to_string(), dump);
        assert_valid(&pool);
    }

    #[test]
    fn reset_reinitializes_pool_and_statistics() {
        let mut pool = Pool::new(Strategy::BestFit, 512).unwrap();
        let _ = pool.allocate(100).unwrap();
        let _ = pool.allocate(600).unwrap();

        pool.reset(256).unwrap();
        assert_eq!(pool.total_memory(), 256);
        assert_eq!(pool.used_memory(), 0);
        assert_eq!(pool.peak_usage(), 0);
        assert_eq!(pool.failed_allocations(), 0);
        assert_eq!(pool.head().size(), 256 - HEADER_SIZE);
        assert_valid(&pool);
    }

    // An allocation that lands on a block too small to split is charged
    // the block's entire payload, not just what was asked for. This is
    // the source system's defined behavior, preserved on purpose.
    #[test]
    fn unsplittable_slack_is_charged() {
        let mut pool = Pool::new(Strategy::FirstFit, 300).unwrap();

        // The head block holds 284 bytes; after 270 the 14 bytes of slack
        // cannot hold a new header, so the split is refused.
        let handle = pool.allocate(270).unwrap();
        assert!(handle.is_some());
        assert_eq!(pool.used_memory(), 300);
        assert_eq!(pool.free_memory(), 0);
        assert_eq!(pool.head().size(), 284);
        assert!(!pool.head().is_free());
        assert_valid(&pool);

        // The whole pool comes back on free.
        pool.deallocate(handle).unwrap();
        assert_eq!(pool.used_memory(), 0);
        assert_valid(&pool);
    }

    #[test]
    fn merge_is_forward_only() {
        let mut pool = Pool::new(Strategy::FirstFit, 512).unwrap();
        let p1 = pool.allocate(64).unwrap();
        let p2 = pool.allocate(64).unwrap();
        let p3 = pool.allocate(64).unwrap();
        // Chain: [64 used][64 used][64 used][256 free tail].

        // Freeing p1 then p2 leaves their blocks adjacent and free: when
        // p2's block is freed, its merge only looks forward, and p3 still
        // guards the tail, so nothing coalesces.
        pool.deallocate(p1).unwrap();
        pool.deallocate(p2).unwrap();

        assert_eq!(pool.blocks().filter(|block| block.is_free()).count(), 3);
        let (validity, stats) = pool.audit();
        assert!(validity.is_valid());
        assert_eq!(stats.adjacent_free, 1);

        // Freeing p3 absorbs the tail forward, but never reaches back to
        // the free blocks before it.
        pool.deallocate(p3).unwrap();
        assert_eq!(pool.blocks().filter(|block| block.is_free()).count(), 3);
        let (validity, stats) = pool.audit();
        assert!(validity.is_valid());
        assert_eq!(stats.adjacent_free, 2);
    }

    #[test]
    fn payload_round_trip() {
        let mut pool = Pool::new(Strategy::FirstFit, 512).unwrap();
        let handle = pool.allocate(32).unwrap().unwrap();

        let payload = pool.payload_mut(handle).unwrap();
        assert_eq!(payload.len(), 32);
        payload.copy_from_slice(&[0xAB; 32]);

        assert_eq!(pool.payload(handle).unwrap(), &[0xAB; 32]);
    }

    #[test]
    fn display_dump_lists_stats_then_blocks() {
        let mut pool = Pool::new(Strategy::FirstFit, 300).unwrap();
        let _ = pool.allocate(112).unwrap();

        let dump = pool.to_string();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "Algorithm: First Fit");
        assert_eq!(lines[1], "Total Memory: 300");
        assert_eq!(lines[2], "Used Memory: 128");
        assert_eq!(lines[3], "Free Memory: 172");
        assert_eq!(lines[4], "Peak Usage: 128");
        assert_eq!(lines[5], "Failed Allocations: 0");
        assert_eq!(lines[6], "Block 0: size=112, free=no");
        assert_eq!(lines[7], "Block 1: size=156, free=yes");
        assert_eq!(lines.len(), 8);
    }

    #[test]
    fn peak_and_failures_never_decrease() {
        let mut pool = Pool::new(Strategy::FirstFit, 300).unwrap();
        let mut peak = 0;
        let mut failed = 0;

        let mut handles = Vec::new();
        for size in [112, 96, 80, 40, 12] {
            match pool.allocate(size).unwrap() {
                Some(handle) => handles.push(handle),
                None => {}
            }
            assert!(pool.peak_usage() >= peak);
            assert!(pool.failed_allocations() >= failed);
            peak = pool.peak_usage();
            failed = pool.failed_allocations();

            if handles.len() > 1 {
                let handle = handles.remove(0);
                pool.deallocate(Some(handle)).unwrap();
                assert_eq!(pool.peak_usage(), peak);
                assert_eq!(pool.failed_allocations(), failed);
            }
            assert_valid(&pool);
        }
    }
}
