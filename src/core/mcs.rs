//! MCS (multi-category security) labels derived from UID blocks
//!
//! Labels are k-combinations of categories `c0..c{n-1}`. The label at
//! offset `i` is the combination of rank `i` in the combinatorial number
//! system, so the sequence for `k = 2` starts `c1,c0`, `c2,c0`, `c2,c1`,
//! `c3,c0`, ...

use crate::core::error::RangeError;
use crate::core::uid::{Block, UidRange};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Default number of categories available to labels
pub const MAX_CATEGORIES: u32 = 1024;

fn category_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^c(\d+)$").unwrap())
}

/// `C(n, k)`, saturating at `u64::MAX`
pub fn binomial(n: u64, k: u64) -> u64 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        result = result * (n - i) as u128 / (i + 1) as u128;
        if result > u64::MAX as u128 {
            return u64::MAX;
        }
    }
    result as u64
}

fn normalize_prefix(prefix: &str) -> String {
    if !prefix.is_empty() && !(prefix.ends_with(':') || prefix.ends_with(',')) {
        format!("{}:", prefix)
    } else {
        prefix.to_string()
    }
}

/// A security label: a prefix such as `s0:` followed by categories
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub prefix: String,
    /// Categories, highest first
    pub categories: Vec<u32>,
}

impl Label {
    /// Label of rank `offset` among the `k`-combinations of `n` categories
    pub fn at_offset(prefix: &str, offset: u64, n: u32, k: u32) -> Self {
        let mut remaining = offset;
        let mut categories = Vec::with_capacity(k as usize);
        let mut upper = n as u64;

        for i in (1..=k as u64).rev() {
            // Largest c < upper with C(c, i) <= remaining
            let mut c = i - 1;
            while c + 1 < upper && binomial(c + 1, i) <= remaining {
                c += 1;
            }
            remaining -= binomial(c, i);
            categories.push(c as u32);
            upper = c;
        }

        Label {
            prefix: normalize_prefix(prefix),
            categories,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)?;
        for (i, c) in self.categories.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "c{}", c)?;
        }
        Ok(())
    }
}

impl FromStr for Label {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RangeError::BadLabelFormat(s.to_string());

        let (prefix, cats) = match s.rfind(':') {
            Some(idx) => (&s[..=idx], &s[idx + 1..]),
            None => ("", s),
        };

        let mut categories = Vec::new();
        for part in cats.split(',').filter(|p| !p.is_empty()) {
            let caps = category_pattern().captures(part).ok_or_else(bad)?;
            categories.push(caps[1].parse::<u32>().map_err(|_| bad())?);
        }
        if categories.is_empty() {
            return Err(bad());
        }
        categories.sort_unstable_by(|a, b| b.cmp(a));
        categories.dedup();

        Ok(Label {
            prefix: prefix.to_string(),
            categories,
        })
    }
}

/// The label space: a prefix, the number of categories and the label length
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelRange {
    prefix: String,
    max_categories: u32,
    labels_per_block: u32,
}

impl LabelRange {
    pub fn new(prefix: &str, max_categories: u32, labels_per_block: u32) -> Result<Self, RangeError> {
        if max_categories == 0 {
            return Err(RangeError::ZeroCategories);
        }
        if labels_per_block == 0 {
            return Err(RangeError::ZeroLabelLength);
        }
        Ok(LabelRange {
            prefix: prefix.to_string(),
            max_categories,
            labels_per_block,
        })
    }

    /// Number of distinct labels
    pub fn size(&self) -> u64 {
        binomial(self.max_categories as u64, self.labels_per_block as u64)
    }

    /// Label at `offset`, if the range has that many labels
    pub fn label_at(&self, offset: u64) -> Option<Label> {
        if offset >= self.size() {
            return None;
        }
        Some(Label::at_offset(
            &self.prefix,
            offset,
            self.max_categories,
            self.labels_per_block,
        ))
    }
}

impl fmt::Display for LabelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max_categories == MAX_CATEGORIES {
            write!(f, "{}/{}", self.prefix, self.labels_per_block)
        } else {
            write!(
                f,
                "{}/{},{}",
                self.prefix, self.labels_per_block, self.max_categories
            )
        }
    }
}

impl FromStr for LabelRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || RangeError::BadLabelRangeFormat(s.to_string());
        let (prefix, size) = s.split_once('/').ok_or_else(bad)?;

        let (k, n) = match size.split_once(',') {
            Some((k, n)) => (k, Some(n)),
            None => (size, None),
        };
        let k: u8 = k.parse().map_err(|_| bad())?;
        let n: u32 = match n {
            Some(n) => n.parse::<u16>().map_err(|_| bad())? as u32,
            None => MAX_CATEGORIES,
        };

        LabelRange::new(prefix, n, k as u32)
    }
}

/// Maps an allocated block to its security label
pub type LabelAllocationFn = Arc<dyn Fn(&Block) -> Option<Label> + Send + Sync>;

/// Label at the block's offset within `from`, scaled by `blocks_per_label`
///
/// `blocks_per_label` is the number of labels to skip per block; 0 or 1
/// maps block `i` to label `i`.
pub fn default_label_allocation(
    from: UidRange,
    to: LabelRange,
    blocks_per_label: u32,
) -> LabelAllocationFn {
    Arc::new(move |block: &Block| {
        let mut offset = from.offset(block)? as u64;
        if blocks_per_label > 0 {
            offset *= blocks_per_label as u64;
        }
        to.label_at(offset)
    })
}
