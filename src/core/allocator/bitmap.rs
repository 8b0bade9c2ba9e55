//! Bit-vector over block indices
//!
//! One bit per block of the UID range:
//! - 0 = free block
//! - 1 = allocated block
//!
//! The stored form is the big-endian byte encoding of the non-negative
//! integer whose bit `i` is the bitmap's bit `i`, with leading zero bytes
//! stripped (an empty bitmap encodes to zero bytes).

/// Fixed-capacity bitmap sized to the number of blocks in a range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    /// Bitmap words (each word = 64 bits = 64 blocks), least significant word first
    words: Vec<u64>,

    /// Number of blocks tracked
    len: usize,
}

fn words_for(bits: usize) -> usize {
    (bits + 63) / 64
}

impl Bitmap {
    /// Create an empty bitmap tracking `len` blocks
    pub fn new(len: usize) -> Self {
        Bitmap {
            words: vec![0u64; words_for(len)],
            len,
        }
    }

    /// Decode a stored bitmap
    ///
    /// Bits set beyond `len` are kept so that re-encoding never drops
    /// state written by someone else; they are never reported as free or
    /// counted by [`Bitmap::count_ones`].
    pub fn from_bytes(bytes: &[u8], len: usize) -> Self {
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        let bytes = &bytes[first..];

        let mut words = vec![0u64; words_for(len).max((bytes.len() + 7) / 8)];
        for (i, &byte) in bytes.iter().rev().enumerate() {
            words[i / 8] |= (byte as u64) << ((i % 8) * 8);
        }

        Bitmap { words, len }
    }

    /// Encode as minimal big-endian bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * 8);
        for word in self.words.iter().rev() {
            out.extend_from_slice(&word.to_be_bytes());
        }

        let first = out.iter().position(|&b| b != 0).unwrap_or(out.len());
        out.drain(..first);
        out
    }

    /// Number of blocks tracked
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.count_ones() == 0
    }

    /// Lowest index in `0..limit` whose bit is clear
    ///
    /// Returns `None` when every bit below `limit` is set.
    pub fn find_first_free(&self, limit: usize) -> Option<usize> {
        for (word_idx, &word) in self.words.iter().enumerate() {
            let base = word_idx * 64;
            if base >= limit {
                return None;
            }
            if word == u64::MAX {
                continue; // All bits set (all allocated)
            }

            let index = base + (!word).trailing_zeros() as usize;
            return if index < limit { Some(index) } else { None };
        }

        // Past the last word every bit is clear
        let index = self.words.len() * 64;
        if index < limit {
            Some(index)
        } else {
            None
        }
    }

    /// Mark a block as allocated
    ///
    /// Returns `true` if the bit was previously clear.
    pub fn set(&mut self, index: usize) -> bool {
        let word_idx = index / 64;
        if word_idx >= self.words.len() {
            self.words.resize(word_idx + 1, 0);
        }

        let mask = 1u64 << (index % 64);
        let was_clear = self.words[word_idx] & mask == 0;
        self.words[word_idx] |= mask;
        was_clear
    }

    /// Mark a block as free
    ///
    /// Returns `true` if the bit was previously set.
    pub fn clear(&mut self, index: usize) -> bool {
        let word_idx = index / 64;
        if word_idx >= self.words.len() {
            return false;
        }

        let mask = 1u64 << (index % 64);
        let was_set = self.words[word_idx] & mask != 0;
        self.words[word_idx] &= !mask;
        was_set
    }

    /// Check if a specific block is allocated
    pub fn is_set(&self, index: usize) -> bool {
        let word_idx = index / 64;
        match self.words.get(word_idx) {
            Some(word) => word & (1u64 << (index % 64)) != 0,
            None => false,
        }
    }

    /// Number of allocated blocks below `len`
    pub fn count_ones(&self) -> usize {
        let full_words = self.len / 64;
        let mut count: usize = self
            .words
            .iter()
            .take(full_words)
            .map(|w| w.count_ones() as usize)
            .sum();

        let rem = self.len % 64;
        if rem > 0 {
            if let Some(word) = self.words.get(full_words) {
                count += (word & ((1u64 << rem) - 1)).count_ones() as usize;
            }
        }
        count
    }

    /// Indices of all allocated blocks below `len`, ascending
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.is_set(i))
    }
}

impl std::fmt::Display for Bitmap {
    /// Renders bit 0 first, e.g. `1110` for blocks 0..=2 allocated out of 4
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.len {
            f.write_str(if self.is_set(i) { "1" } else { "0" })?;
        }
        Ok(())
    }
}
