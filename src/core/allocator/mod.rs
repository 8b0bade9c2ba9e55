//! Block allocation over a UID range
//!
//! - [`Bitmap`]: one bit per block, stored as big-endian bytes
//! - [`RangeAllocator`]: maps UID blocks onto bitmap slots and tracks which
//!   are claimed; allocation takes the next slot with it and repair rebuilds
//!   the authoritative bitmap with it

pub mod bitmap;
pub mod range;

pub use bitmap::Bitmap;
pub use range::RangeAllocator;

use crate::core::error::AllocatorError;
use crate::core::uid::Block;

/// Block allocator trait
///
/// Defines the interface for claiming UID blocks. Blocks are never released
/// one by one; repair rebuilds the whole set from the namespaces.
pub trait BlockAllocator {
    /// Claim a specific block
    fn allocate(&mut self, block: Block) -> Result<(), AllocatorError>;

    /// Claim the lowest free block
    fn allocate_next(&mut self) -> Result<Block, AllocatorError>;

    /// Whether the block is claimed
    fn has(&self, block: &Block) -> bool;

    /// Get total number of blocks managed
    fn total_blocks(&self) -> usize;

    /// Get number of free blocks available
    fn free_blocks(&self) -> usize;
}
