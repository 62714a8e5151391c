// SPDX-License-Identifier: Apache-2.0
// Copyright 2023-2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Addressing of Allocation Blocks: [`AllocBlockIndex`], [`AllocBlockCount`]
//! and [`AllocBlockRange`].
//!
//! An Allocation Block is the unit of allocation tracked by a single bit in
//! an [allocation bitmap](crate::alloc_bitmap).

use core::{convert, ops};

/// Allocation Block count.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct AllocBlockCount {
    count: u64,
}

impl convert::From<u64> for AllocBlockCount {
    fn from(value: u64) -> Self {
        Self { count: value }
    }
}

impl convert::From<AllocBlockCount> for u64 {
    fn from(value: AllocBlockCount) -> Self {
        value.count
    }
}

/// Allocation Block index, i.e. a bit position in an allocation bitmap.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct AllocBlockIndex {
    index: u64,
}

impl convert::From<u64> for AllocBlockIndex {
    fn from(value: u64) -> Self {
        Self { index: value }
    }
}

impl convert::From<AllocBlockIndex> for u64 {
    fn from(value: AllocBlockIndex) -> Self {
        value.index
    }
}

impl ops::Add<AllocBlockCount> for AllocBlockIndex {
    type Output = Self;

    fn add(self, rhs: AllocBlockCount) -> Self::Output {
        Self {
            index: self.index + rhs.count,
        }
    }
}

impl ops::Sub<Self> for AllocBlockIndex {
    type Output = AllocBlockCount;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::Output {
            count: self.index - rhs.index,
        }
    }
}

/// Non-empty range of Allocation Blocks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AllocBlockRange {
    b: AllocBlockIndex,
    e: AllocBlockIndex,
}

impl AllocBlockRange {
    /// Create a range from its inclusive `b`egin and exclusive `e`nd.
    pub fn new(b: AllocBlockIndex, e: AllocBlockIndex) -> Self {
        debug_assert!(b < e);
        Self { b, e }
    }

    pub fn begin(&self) -> AllocBlockIndex {
        self.b
    }

    pub fn end(&self) -> AllocBlockIndex {
        self.e
    }

    pub fn block_count(&self) -> AllocBlockCount {
        self.e - self.b
    }

    /// Translate the range by `offset` Allocation Blocks towards the end.
    pub fn offset_by(&self, offset: AllocBlockCount) -> Self {
        Self {
            b: self.b + offset,
            e: self.e + offset,
        }
    }
}

impl convert::From<(AllocBlockIndex, AllocBlockCount)> for AllocBlockRange {
    fn from(value: (AllocBlockIndex, AllocBlockCount)) -> Self {
        Self::new(value.0, value.0 + value.1)
    }
}

#[test]
fn test_alloc_block_range() {
    let range = AllocBlockRange::from((AllocBlockIndex::from(3), AllocBlockCount::from(5)));
    assert_eq!(range.begin(), AllocBlockIndex::from(3));
    assert_eq!(range.end(), AllocBlockIndex::from(8));
    assert_eq!(range.block_count(), AllocBlockCount::from(5));

    let range = range.offset_by(AllocBlockCount::from(64));
    assert_eq!(range.begin(), AllocBlockIndex::from(67));
    assert_eq!(range.end(), AllocBlockIndex::from(72));
    assert_eq!(range.block_count(), AllocBlockCount::from(5));
}
