// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Implementation of [`FreeRangeIterator`].

use super::bitmap_word::{BitmapWord, bitmap_word_begin, pos_in_bitmap_word};
use super::word_scanner::{WordScanResult, WordScanner};
use crate::layout;
use crate::utils_common::bitmanip::BitManip as _;
use core::iter;

/// [`Iterator`] over the free runs of some minimum length in a sequence of
/// [`BitmapWord`]s.
///
/// Each maximal run of free Allocation Blocks is reported exactly once, in
/// ascending order and with its full length, even if it spans multiple
/// [`BitmapWord`]s. The end of the scanned sequence is treated as if an
/// allocated block was located right past it. Reported positions are relative
/// to the beginning of the sequence.
///
/// The iterator performs a single forward pass only and does not allocate.
pub struct FreeRangeIterator<'a> {
    bitmap_words: &'a [BitmapWord],
    /// Free runs must begin before the word at this index in order to get
    /// reported.
    bitmap_words_begins_end: usize,
    scanner: WordScanner,
    cur_bitmap_word_index: usize,
    /// Working copy of the current word, with the bits of already reported free
    /// runs set.
    cur_bitmap_word: BitmapWord,
}

impl<'a> FreeRangeIterator<'a> {
    /// Iterate over all free runs in `bitmap_words` of length
    /// `min_block_count` or larger.
    ///
    /// # Arguments:
    ///
    /// * `bitmap_words` - The bitmap to search.
    /// * `min_block_count` - Minimum length of the free runs to report. Zero
    ///   is treated like one.
    pub fn new(bitmap_words: &'a [BitmapWord], min_block_count: layout::AllocBlockCount) -> Self {
        Self::new_with_begins_limit(bitmap_words, bitmap_words.len(), min_block_count)
    }

    /// Iterate over free runs beginning before a specified [`BitmapWord`].
    ///
    /// Only free runs beginning within the first `bitmap_words_begins_end`
    /// [`BitmapWord`]s get reported. The subsequent words are examined only
    /// for determining the full length of a free run crossing that boundary.
    ///
    /// # Arguments:
    ///
    /// * `bitmap_words` - The bitmap to search.
    /// * `bitmap_words_begins_end` - Number of leading [`BitmapWord`]s free
    ///   runs must begin in. Must not exceed `bitmap_words.len()`.
    /// * `min_block_count` - Minimum length of the free runs to report. Zero
    ///   is treated like one.
    pub fn new_with_begins_limit(
        bitmap_words: &'a [BitmapWord],
        bitmap_words_begins_end: usize,
        min_block_count: layout::AllocBlockCount,
    ) -> Self {
        debug_assert!(bitmap_words_begins_end <= bitmap_words.len());
        let bitmap_words_begins_end = bitmap_words_begins_end.min(bitmap_words.len());
        // With nothing to report, start out with a fully allocated word, the
        // iteration will terminate right away.
        let cur_bitmap_word = if bitmap_words_begins_end != 0 {
            bitmap_words[0]
        } else {
            !0
        };
        Self {
            bitmap_words,
            bitmap_words_begins_end,
            // Any free run is at least one block long.
            scanner: WordScanner::new(u64::from(min_block_count).max(1)),
            cur_bitmap_word_index: 0,
            cur_bitmap_word,
        }
    }

    /// Position free runs must begin before in order to get reported.
    fn begins_end(&self) -> u64 {
        bitmap_word_begin(self.bitmap_words_begins_end as u64)
    }

    /// Load the next [`BitmapWord`] into [`Self::cur_bitmap_word`].
    ///
    /// Words past [`Self::bitmap_words_begins_end`] get loaded only for as
    /// long as the free run currently being tracked began before that.
    /// Returns `false` if the iteration has reached its end.
    fn goto_next_bitmap_word(&mut self) -> bool {
        let next_bitmap_word_index = self.cur_bitmap_word_index + 1;
        if next_bitmap_word_index < self.bitmap_words_begins_end
            || (next_bitmap_word_index < self.bitmap_words.len() && self.scanner.free_run_begin() < self.begins_end())
        {
            self.cur_bitmap_word_index = next_bitmap_word_index;
            self.cur_bitmap_word = self.bitmap_words[next_bitmap_word_index];
            true
        } else {
            self.exhaust();
            false
        }
    }

    /// Force the iteration into its terminal state.
    ///
    /// The current word gets marked as fully allocated and an obstacle placed
    /// right past its end, so that no further free runs will be found.
    fn exhaust(&mut self) {
        self.cur_bitmap_word = !0;
        self.scanner
            .place_obstacle(bitmap_word_begin(self.cur_bitmap_word_index as u64 + 1));
    }

    fn free_range(begin: u64, end: u64) -> layout::AllocBlockRange {
        layout::AllocBlockRange::new(layout::AllocBlockIndex::from(begin), layout::AllocBlockIndex::from(end))
    }
}

impl<'a> Iterator for FreeRangeIterator<'a> {
    type Item = layout::AllocBlockRange;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self
                .scanner
                .scan_word(self.cur_bitmap_word, self.cur_bitmap_word_index as u64)
            {
                Some(WordScanResult::Closed { begin, end }) => {
                    if begin >= self.begins_end() {
                        self.exhaust();
                        return None;
                    }
                    // Mask everything up to and including the obstacle, so that
                    // the next scan of the same word resumes right after it.
                    self.cur_bitmap_word |= BitmapWord::trailing_bits_mask(pos_in_bitmap_word(end) + 1);
                    return Some(Self::free_range(begin, end));
                }
                Some(WordScanResult::Open { begin, end }) => {
                    if begin >= self.begins_end() {
                        self.exhaust();
                        return None;
                    }
                    // The free run might continue in the next word. If there
                    // is none, the end of the bitmap bounds it.
                    if !self.goto_next_bitmap_word() {
                        return Some(Self::free_range(begin, end));
                    }
                }
                None => {
                    if !self.goto_next_bitmap_word() {
                        return None;
                    }
                }
            }
        }
    }
}

impl<'a> iter::FusedIterator for FreeRangeIterator<'a> {}

#[cfg(test)]
extern crate alloc;

#[cfg(test)]
fn collect_free_ranges(iter: FreeRangeIterator<'_>) -> alloc::vec::Vec<(u64, u64)> {
    iter.map(|r| (u64::from(r.begin()), u64::from(r.block_count())))
        .collect()
}

#[test]
fn test_free_range_iterator_single_word() {
    let bitmap = [0];
    let mut iter = FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(10));
    assert_eq!(
        iter.next(),
        Some(layout::AllocBlockRange::new(
            layout::AllocBlockIndex::from(0),
            layout::AllocBlockIndex::from(64)
        ))
    );
    assert_eq!(iter.next(), None);
    assert_eq!(iter.next(), None);

    let bitmap = [!0];
    let mut iter = FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(1));
    assert_eq!(iter.next(), None);

    let bitmap = [0x41 | (1 << 20)];
    assert_eq!(
        collect_free_ranges(FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(5))),
        [(1, 5), (7, 13), (21, 43)]
    );
    assert_eq!(
        collect_free_ranges(FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(6))),
        [(7, 13), (21, 43)]
    );
}

#[test]
fn test_free_range_iterator_zero_min_block_count() {
    let bitmap = [0x2];
    assert_eq!(
        collect_free_ranges(FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(0))),
        [(0, 1), (2, 62)]
    );
    assert_eq!(
        collect_free_ranges(FreeRangeIterator::new_with_begins_limit(
            &bitmap,
            1,
            layout::AllocBlockCount::from(0)
        )),
        [(0, 1), (2, 62)]
    );
}

#[test]
fn test_free_range_iterator_stitching() {
    // Free runs spanning word boundaries are reported once, in full.
    let bitmap = [1 << 60, 0, 0x2, !0, 0];
    assert_eq!(
        collect_free_ranges(FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(1))),
        [(0, 60), (61, 68), (130, 62), (256, 64)]
    );

    // A free run ending right at a word boundary, followed by an obstacle at
    // the next word's first bit.
    let bitmap = [0, 0x1 | (1 << 10)];
    assert_eq!(
        collect_free_ranges(FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(5))),
        [(0, 64), (65, 9), (75, 53)]
    );

    // A free run reaching the end of the words is bounded there.
    let bitmap = [!0 >> 1, 0];
    assert_eq!(
        collect_free_ranges(FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(65))),
        [(63, 65)]
    );
    assert!(collect_free_ranges(FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(66))).is_empty());
}

#[test]
fn test_free_range_iterator_begins_limit() {
    let bitmap = [1, 0, 0x10 | (1 << 40), 0];

    // The free run beginning in the first word continues up to bit 132.
    assert_eq!(
        collect_free_ranges(FreeRangeIterator::new_with_begins_limit(
            &bitmap,
            1,
            layout::AllocBlockCount::from(1)
        )),
        [(1, 131)]
    );
    assert_eq!(
        collect_free_ranges(FreeRangeIterator::new_with_begins_limit(
            &bitmap,
            3,
            layout::AllocBlockCount::from(1)
        )),
        [(1, 131), (133, 35), (169, 87)]
    );
    // Too small runs crossing the boundary don't get reported either.
    assert!(
        collect_free_ranges(FreeRangeIterator::new_with_begins_limit(
            &bitmap,
            1,
            layout::AllocBlockCount::from(132)
        ))
        .is_empty()
    );
    assert!(
        collect_free_ranges(FreeRangeIterator::new_with_begins_limit(
            &bitmap,
            0,
            layout::AllocBlockCount::from(1)
        ))
        .is_empty()
    );

    let bitmap: [BitmapWord; 0] = [];
    assert!(collect_free_ranges(FreeRangeIterator::new(&bitmap, layout::AllocBlockCount::from(1))).is_empty());
}
