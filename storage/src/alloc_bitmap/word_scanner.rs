// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Implementation of [`WordScanner`].

use super::bitmap_word::{BitmapWord, bitmap_word_begin};
use crate::utils_common::bitmanip::BitManip as _;

/// Free run of sufficient length found by [`WordScanner::scan_word()`].
///
/// Positions are in units of Allocation Blocks, relative to the beginning of
/// the scanned sequence of [`BitmapWord`]s.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum WordScanResult {
    /// The free run `[begin, end)` is bounded by an allocated block at `end`,
    /// which is located within the scanned word.
    Closed { begin: u64, end: u64 },
    /// The free run `[begin, end)` extends up to the scanned word's end at
    /// `end`, it might continue in the next word.
    Open { begin: u64, end: u64 },
}

/// Find sufficiently large gaps between allocated blocks, one [`BitmapWord`]
/// at a time.
///
/// The scanner keeps track of the most recently encountered allocated block,
/// the *obstacle*, across calls to [`scan_word()`](Self::scan_word).
pub(super) struct WordScanner {
    min_free_run_len: u64,
    /// Position of the last obstacle seen, `None` if none has been encountered
    /// yet, in which case a free run starts at position zero.
    prev_obstacle: Option<u64>,
}

impl WordScanner {
    pub(super) fn new(min_free_run_len: u64) -> Self {
        debug_assert!(min_free_run_len != 0);
        Self {
            min_free_run_len,
            prev_obstacle: None,
        }
    }

    /// Beginning of the free run currently being tracked.
    pub(super) fn free_run_begin(&self) -> u64 {
        match self.prev_obstacle {
            Some(prev_obstacle) => prev_obstacle + 1,
            None => 0,
        }
    }

    /// Length of the currently tracked free run if it was bounded at `end`.
    ///
    /// Returns `None` if `end` is located at or before the last obstacle seen.
    fn free_run_len_to(&self, end: u64) -> Option<u64> {
        end.checked_sub(self.free_run_begin())
    }

    /// Record an obstacle at `pos`, which must not be located before the last
    /// one seen.
    ///
    /// Used for placing virtual obstacles past the end of the scanned words.
    pub(super) fn place_obstacle(&mut self, pos: u64) {
        debug_assert!(self.prev_obstacle.is_none_or(|prev_obstacle| prev_obstacle <= pos));
        self.prev_obstacle = Some(pos);
    }

    /// Scan a [`BitmapWord`] for the next free run of sufficient length.
    ///
    /// At most one free run is reported per invocation. Once a
    /// [`WordScanResult::Closed`] has been returned, the caller is expected to
    /// mark all bits up to and including the bounding obstacle as allocated
    /// in its working copy of the word before scanning the word again. Set
    /// bits at or before the last obstacle seen are ignored.
    ///
    /// # Arguments:
    ///
    /// * `bitmap_word` - The word to scan.
    /// * `bitmap_word_index` - The word's index, relative to the beginning of
    ///   the scanned sequence.
    pub(super) fn scan_word(&mut self, bitmap_word: BitmapWord, bitmap_word_index: u64) -> Option<WordScanResult> {
        let word_begin = bitmap_word_begin(bitmap_word_index);
        let word_end = word_begin + BitmapWord::BITS as u64;

        // Skip over fully allocated words, unless the first bit closes a
        // pending free run of sufficient length.
        if bitmap_word == !0
            && !self
                .free_run_len_to(word_begin)
                .is_some_and(|free_run_len| free_run_len >= self.min_free_run_len)
        {
            self.prev_obstacle = Some(word_end - 1);
            return None;
        }

        let mut remaining_obstacles = bitmap_word;
        while remaining_obstacles != 0 {
            let obstacle = word_begin + remaining_obstacles.trailing_zeros() as u64;
            remaining_obstacles = remaining_obstacles.clear_lowest_set_bit();

            let Some(free_run_len) = self.free_run_len_to(obstacle) else {
                // Examined already.
                continue;
            };
            let free_run_begin = self.free_run_begin();
            self.prev_obstacle = Some(obstacle);
            if free_run_len >= self.min_free_run_len {
                return Some(WordScanResult::Closed {
                    begin: free_run_begin,
                    end: obstacle,
                });
            }
        }

        let free_run_len = self.free_run_len_to(word_end)?;
        if free_run_len >= self.min_free_run_len {
            Some(WordScanResult::Open {
                begin: self.free_run_begin(),
                end: word_end,
            })
        } else {
            None
        }
    }
}

#[test]
fn test_word_scanner_free_word() {
    let mut scanner = WordScanner::new(10);
    assert_eq!(
        scanner.scan_word(0, 0),
        Some(WordScanResult::Open { begin: 0, end: 64 })
    );
    // The open run continues into the next word.
    assert_eq!(
        scanner.scan_word(0, 1),
        Some(WordScanResult::Open { begin: 0, end: 128 })
    );
    assert_eq!(
        scanner.scan_word(0x10, 2),
        Some(WordScanResult::Closed { begin: 0, end: 132 })
    );

    let mut scanner = WordScanner::new(65);
    assert_eq!(scanner.scan_word(0, 0), None);
    assert_eq!(
        scanner.scan_word(0, 1),
        Some(WordScanResult::Open { begin: 0, end: 128 })
    );
}

#[test]
fn test_word_scanner_allocated_word() {
    let mut scanner = WordScanner::new(1);
    assert_eq!(scanner.scan_word(!0, 0), None);
    assert_eq!(scanner.free_run_begin(), 64);
    assert_eq!(
        scanner.scan_word(0, 1),
        Some(WordScanResult::Open { begin: 64, end: 128 })
    );

    // A pending free run gets closed by a subsequent fully allocated word.
    let mut scanner = WordScanner::new(5);
    assert_eq!(scanner.scan_word(!0, 0), None);
    assert_eq!(scanner.free_run_begin(), 64);
    assert_eq!(
        scanner.scan_word(0, 1),
        Some(WordScanResult::Open { begin: 64, end: 128 })
    );
    assert_eq!(
        scanner.scan_word(!0, 2),
        Some(WordScanResult::Closed { begin: 64, end: 128 })
    );
    assert_eq!(scanner.scan_word(!0, 2), None);
    assert_eq!(scanner.free_run_begin(), 192);
}

#[test]
fn test_word_scanner_gaps() {
    let mut scanner = WordScanner::new(5);
    let mut bitmap_word: BitmapWord = 0x41 | (0x3 << 20) | (1 << 26);
    assert_eq!(
        scanner.scan_word(bitmap_word, 0),
        Some(WordScanResult::Closed { begin: 1, end: 6 })
    );
    bitmap_word |= u64::trailing_bits_mask(7);
    assert_eq!(
        scanner.scan_word(bitmap_word, 0),
        Some(WordScanResult::Closed { begin: 7, end: 20 })
    );
    bitmap_word |= u64::trailing_bits_mask(21);
    // The gap between bits 21 and 26 is too small.
    assert_eq!(
        scanner.scan_word(bitmap_word, 0),
        Some(WordScanResult::Open { begin: 27, end: 64 })
    );

    // Gaps of three bits each, the trailing one continues into the next word.
    let mut scanner = WordScanner::new(5);
    assert_eq!(scanner.scan_word(0x1111_1111_1111_1111, 0), None);
    assert_eq!(scanner.free_run_begin(), 61);
    assert_eq!(
        scanner.scan_word(0x4, 1),
        Some(WordScanResult::Closed { begin: 61, end: 66 })
    );
}

#[test]
fn test_word_scanner_virtual_obstacle() {
    let mut scanner = WordScanner::new(3);
    assert_eq!(
        scanner.scan_word(0, 0),
        Some(WordScanResult::Open { begin: 0, end: 64 })
    );
    scanner.place_obstacle(64);
    assert_eq!(scanner.scan_word(!0, 0), None);
    assert_eq!(scanner.free_run_begin(), 64);
}
