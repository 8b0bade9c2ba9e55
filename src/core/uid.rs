//! UID ranges and blocks
//!
//! A [`UidRange`] is the global id space this controller allocates from,
//! cut into equally sized [`Block`]s. Bit `i` of the allocation bitmap
//! corresponds to [`UidRange::block_at`]`(i)`.
//!
//! String forms:
//! - block: `"<start>/<size>"` (also parses `"<start>-<end>"`)
//! - range: `"<start>-<end>/<blockSize>"`

use crate::core::error::RangeError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

fn block_slash_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)/(\d+)$").unwrap())
}

fn block_dash_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)-(\d+)$").unwrap())
}

fn range_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)-(\d+)/(\d+)$").unwrap())
}

/// Inclusive, contiguous run of UIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    pub start: u32,
    pub end: u32,
}

impl Block {
    pub fn new(start: u32, end: u32) -> Self {
        Block { start, end }
    }

    /// Number of UIDs in the block; 0 if `end` precedes `start`
    pub fn size(&self) -> u32 {
        match self.end.checked_sub(self.start) {
            Some(span) => span.saturating_add(1),
            None => 0,
        }
    }

    /// Whether two blocks share at least one UID
    pub fn overlaps(&self, other: &Block) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// `"<start>-<end>"` form
    pub fn range_string(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.start, self.size())
    }
}

impl FromStr for Block {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RangeError::BadBlockFormat(s.to_string());

        if let Some(caps) = block_slash_pattern().captures(s) {
            let start: u32 = caps[1].parse().map_err(|_| bad())?;
            let size: u32 = caps[2].parse().map_err(|_| bad())?;
            if size == 0 {
                return Err(bad());
            }
            let end = start.checked_add(size - 1).ok_or_else(bad)?;
            return Ok(Block { start, end });
        }

        if let Some(caps) = block_dash_pattern().captures(s) {
            let start: u32 = caps[1].parse().map_err(|_| bad())?;
            let end: u32 = caps[2].parse().map_err(|_| bad())?;
            if start > end {
                return Err(RangeError::StartAfterEnd { start, end });
            }
            return Ok(Block { start, end });
        }

        Err(bad())
    }
}

/// The global UID space and the size of each block handed out from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UidRange {
    block: Block,
    block_size: u32,
}

impl UidRange {
    /// Create a range spanning `start..=end` cut into blocks of `block_size`
    pub fn new(start: u32, end: u32, block_size: u32) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::StartAfterEnd { start, end });
        }
        if block_size == 0 {
            return Err(RangeError::ZeroBlockSize);
        }
        if end - start < block_size - 1 {
            return Err(RangeError::BlockSizeTooLarge);
        }

        Ok(UidRange {
            block: Block { start, end },
            block_size,
        })
    }

    /// Number of blocks (bitmap slots) in the range
    pub fn size(&self) -> u32 {
        self.block.size() / self.block_size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Outer bounds of the range
    pub fn bounds(&self) -> Block {
        self.block
    }

    /// Block for slot `offset`, if the slot exists
    pub fn block_at(&self, offset: u32) -> Option<Block> {
        if offset >= self.size() {
            return None;
        }
        let start = self.block.start + offset * self.block_size;
        Some(Block {
            start,
            end: start + self.block_size - 1,
        })
    }

    /// Slot index of `block`, if it is one of this range's blocks
    pub fn offset(&self, block: &Block) -> Option<u32> {
        if block.start < self.block.start || block.end > self.block.end {
            return None;
        }
        if block.size() != self.block_size {
            return None;
        }
        let delta = block.start - self.block.start;
        if delta % self.block_size != 0 {
            return None;
        }
        let offset = delta / self.block_size;
        if offset >= self.size() {
            return None;
        }
        Some(offset)
    }

    pub fn contains(&self, block: &Block) -> bool {
        self.offset(block).is_some()
    }
}

impl fmt::Display for UidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.block.range_string(), self.block_size)
    }
}

impl FromStr for UidRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RangeError::BadRangeFormat(s.to_string());
        let caps = range_pattern().captures(s).ok_or_else(bad)?;
        let start: u32 = caps[1].parse().map_err(|_| bad())?;
        let end: u32 = caps[2].parse().map_err(|_| bad())?;
        let block_size: u32 = caps[3].parse().map_err(|_| bad())?;
        UidRange::new(start, end, block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_slash() {
        let block: Block = "1000/10".parse().unwrap();
        assert_eq!(block, Block::new(1000, 1009));
        assert_eq!(block.to_string(), "1000/10");
        assert_eq!(block.range_string(), "1000-1009");
    }

    #[test]
    fn test_parse_block_dash() {
        let block: Block = "1000-1009".parse().unwrap();
        assert_eq!(block, Block::new(1000, 1009));
        assert_eq!(block.size(), 10);
    }

    #[test]
    fn test_parse_block_invalid() {
        assert!("".parse::<Block>().is_err());
        assert!("abc".parse::<Block>().is_err());
        assert!("10/0".parse::<Block>().is_err());
        assert!("10-5".parse::<Block>().is_err());
        assert!("1000/10/2".parse::<Block>().is_err());
        assert!("4294967295/2".parse::<Block>().is_err());
    }

    #[test]
    fn test_range_round_trip() {
        let range: UidRange = "1000000000-1999999999/10000".parse().unwrap();
        assert_eq!(range.size(), 100_000);
        assert_eq!(range.block_size(), 10_000);
        assert_eq!(range.to_string(), "1000000000-1999999999/10000");
    }

    #[test]
    fn test_range_validation() {
        assert!(matches!(
            UidRange::new(10, 5, 1),
            Err(RangeError::StartAfterEnd { .. })
        ));
        assert!(matches!(
            UidRange::new(0, 9, 0),
            Err(RangeError::ZeroBlockSize)
        ));
        assert!(matches!(
            UidRange::new(0, 9, 11),
            Err(RangeError::BlockSizeTooLarge)
        ));
        assert!(UidRange::new(0, 9, 10).is_ok());
        assert!("0-9".parse::<UidRange>().is_err());
    }

    #[test]
    fn test_block_at_and_offset() {
        let range = UidRange::new(0, 3, 1).unwrap();
        assert_eq!(range.size(), 4);
        assert_eq!(range.block_at(0), Some(Block::new(0, 0)));
        assert_eq!(range.block_at(3), Some(Block::new(3, 3)));
        assert_eq!(range.block_at(4), None);

        let range = UidRange::new(100, 199, 10).unwrap();
        let block = range.block_at(3).unwrap();
        assert_eq!(block, Block::new(130, 139));
        assert_eq!(range.offset(&block), Some(3));
    }

    #[test]
    fn test_offset_rejects_foreign_blocks() {
        let range = UidRange::new(100, 199, 10).unwrap();
        assert_eq!(range.offset(&Block::new(90, 99)), None); // below
        assert_eq!(range.offset(&Block::new(200, 209)), None); // above
        assert_eq!(range.offset(&Block::new(100, 104)), None); // wrong size
        assert_eq!(range.offset(&Block::new(105, 114)), None); // misaligned
    }

    #[test]
    fn test_reversed_block_is_never_a_slot() {
        let reversed = Block::new(5, 3);
        assert_eq!(reversed.size(), 0);
        assert_eq!(reversed.to_string(), "5/0");

        let range = UidRange::new(0, 9, 1).unwrap();
        assert_eq!(range.offset(&reversed), None);
        assert!(!range.contains(&Block::new(9, 0)));
    }

    #[test]
    fn test_trailing_partial_block_is_not_a_slot() {
        // 25 ids with blocks of 10 -> two slots, 120..=124 is unused
        let range = UidRange::new(100, 124, 10).unwrap();
        assert_eq!(range.size(), 2);
        assert_eq!(range.block_at(2), None);
        assert_eq!(range.offset(&Block::new(120, 129)), None);
    }

    #[test]
    fn test_blocks_never_overlap() {
        let range = UidRange::new(1000, 1999, 100).unwrap();
        let blocks: Vec<_> = (0..range.size()).filter_map(|i| range.block_at(i)).collect();
        for (i, a) in blocks.iter().enumerate() {
            for b in &blocks[i + 1..] {
                assert!(!a.overlaps(b));
            }
        }
    }
}
