use core::fmt;

use crate::block::Block;

/// The placement policy deciding which free block satisfies a request.
///
/// A strategy is only the search step; splitting, merging and statistics
/// are shared by the pool and identical across strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Take the first free block that fits, scanning from the head. Cheap
    /// searches, but tends to chew up the low-offset end of the pool.
    FirstFit,
    /// Scan the whole chain and take the smallest free block that fits,
    /// ties going to the earlier block. Minimizes leftover slack at the
    /// cost of a full scan and a buildup of tiny fragments.
    BestFit,
    /// Scan the whole chain and take the largest free block that fits,
    /// ties going to the earlier block. Leaves the biggest possible
    /// remainder, keeping leftovers usable for future requests.
    WorstFit,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::FirstFit, Strategy::BestFit, Strategy::WorstFit];

    /// Human-readable algorithm name, as printed in the status dump.
    pub fn name(self) -> &'static str {
        match self {
            Strategy::FirstFit => "First Fit",
            Strategy::BestFit => "Best Fit",
            Strategy::WorstFit => "Worst Fit",
        }
    }

    /// Search `chain` for a free block with at least `size` payload bytes
    /// and return its header offset, or `None` when nothing fits.
    pub(crate) fn find<'chain, I>(self, chain: I, size: usize) -> Option<usize>
    where
        I: Iterator<Item = &'chain Block>,
    {
        let mut candidates = chain.filter(|block| block.is_free() && block.size() >= size);

        match self {
            Strategy::FirstFit => candidates.next().map(Block::offset),
            Strategy::BestFit => {
                let mut best: Option<&Block> = None;
                for block in candidates {
                    if best.map_or(true, |b| block.size() < b.size()) {
                        best = Some(block);
                    }
                }
                best.map(Block::offset)
            }
            Strategy::WorstFit => {
                let mut worst: Option<&Block> = None;
                for block in candidates {
                    if worst.map_or(true, |b| block.size() > b.size()) {
                        worst = Some(block);
                    }
                }
                worst.map(Block::offset)
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
