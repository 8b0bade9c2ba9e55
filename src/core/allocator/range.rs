//! In-memory allocator over the blocks of a [`UidRange`]

use crate::core::allocator::bitmap::Bitmap;
use crate::core::allocator::BlockAllocator;
use crate::core::error::AllocatorError;
use crate::core::uid::{Block, UidRange};

/// Tracks claimed blocks of a UID range in a [`Bitmap`]
#[derive(Debug, Clone)]
pub struct RangeAllocator {
    range: UidRange,
    bitmap: Bitmap,
    allocated: usize,
}

impl RangeAllocator {
    /// Create an allocator with every block free
    pub fn new(range: UidRange) -> Self {
        RangeAllocator {
            range,
            bitmap: Bitmap::new(range.size() as usize),
            allocated: 0,
        }
    }

    pub fn range(&self) -> &UidRange {
        &self.range
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Allocator over a stored bitmap
    ///
    /// Bits beyond the range are carried through to [`RangeAllocator::snapshot`].
    pub fn from_bytes(range: UidRange, data: &[u8]) -> Self {
        let bitmap = Bitmap::from_bytes(data, range.size() as usize);
        RangeAllocator {
            range,
            allocated: bitmap.count_ones(),
            bitmap,
        }
    }

    /// Canonical range string and bitmap bytes, ready to store
    pub fn snapshot(&self) -> (String, Vec<u8>) {
        (self.range.to_string(), self.bitmap.to_bytes())
    }
}

impl BlockAllocator for RangeAllocator {
    /// Claim `block`
    ///
    /// Foreign blocks report `NotInRange` and claimed ones `Allocated`, even
    /// when no slot is left.
    fn allocate(&mut self, block: Block) -> Result<(), AllocatorError> {
        let offset = self
            .range
            .offset(&block)
            .ok_or(AllocatorError::NotInRange)? as usize;

        if self.bitmap.is_set(offset) {
            return Err(AllocatorError::Allocated);
        }
        if self.allocated >= self.bitmap.len() {
            return Err(AllocatorError::Full);
        }

        self.bitmap.set(offset);
        self.allocated += 1;
        Ok(())
    }

    fn allocate_next(&mut self) -> Result<Block, AllocatorError> {
        let offset = self
            .bitmap
            .find_first_free(self.bitmap.len())
            .ok_or(AllocatorError::Full)?;
        let block = self
            .range
            .block_at(offset as u32)
            .ok_or(AllocatorError::NotInRange)?;

        self.bitmap.set(offset);
        self.allocated += 1;
        Ok(block)
    }

    fn has(&self, block: &Block) -> bool {
        match self.range.offset(block) {
            Some(offset) => self.bitmap.is_set(offset as usize),
            None => false,
        }
    }

    fn total_blocks(&self) -> usize {
        self.bitmap.len()
    }

    fn free_blocks(&self) -> usize {
        self.bitmap.len() - self.allocated
    }
}
