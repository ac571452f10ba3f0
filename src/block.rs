use core::fmt;

use crate::error::PoolError;

/// Every block pays this many bytes for its header.
///
/// The pool charges one header per block when accounting for space, and a
/// free block can only be carved off a larger one if the remainder can hold
/// at least a header's worth of payload. This is a stronger constraint than
/// a logical descriptor strictly needs, but it keeps the arithmetic simple
/// and matches the layout the pool models.
pub const HEADER_SIZE: usize = 16;

/// The descriptor for one region of the pool.
///
/// A block records where its header sits inside the pool (`offset`), how
/// many payload bytes follow the header (`size`), whether the region is
/// available (`free`), and the header offset of the next block in address
/// order (`next`, `None` for the last block).
///
/// A block knows nothing about its neighbors beyond its own `next` link;
/// all chain-wide invariants live in [`Pool`](crate::pool::Pool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    offset: usize,
    size: usize,
    free: bool,
    next: Option<usize>,
}

impl Block {
    /// Construct a free, unlinked block at `offset` with `size` payload
    /// bytes. A size of zero is valid: it describes a block that is all
    /// header.
    pub fn new(offset: usize, size: usize) -> Block {
        Block {
            offset,
            size,
            free: true,
            next: None,
        }
    }

    /// Byte offset of this block's header inside the pool.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Byte offset of this block's payload inside the pool.
    pub fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    /// Payload bytes following the header.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Is the block available for allocation?
    pub fn is_free(&self) -> bool {
        self.free
    }

    /// Header offset of the following block, or `None` for the last block.
    pub fn next(&self) -> Option<usize> {
        self.next
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    pub fn set_free(&mut self, free: bool) {
        self.free = free;
    }

    /// Link this block to the block whose header sits at `next`.
    ///
    /// Fails if `next` is the block's own offset; a self-loop would make
    /// the chain non-terminating.
    pub fn set_next(&mut self, next: Option<usize>) -> Result<(), PoolError> {
        if next == Some(self.offset) {
            return Err(PoolError::InvalidArgument("block cannot link to itself"));
        }
        self.next = next;
        Ok(())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size={}, free={}",
            self.size,
            if self.free { "yes" } else { "no" }
        )
    }
}
