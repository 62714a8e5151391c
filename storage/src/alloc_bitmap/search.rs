// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Implementation of [`find_free_range()`].

use super::bitmap_word::{BITMAP_WORD_BITS_LOG2, BitmapWord, bitmap_word_begin, bitmap_word_index};
use super::free_ranges::FreeRangeIterator;
use super::select::select_free_range;
use crate::layout;

/// Find a run of free Allocation Blocks, preferably near some hint position.
///
/// The search is conducted in two phases. First, the bitmap gets searched
/// from the [`BitmapWord`] containing `hint` onwards: an exact fit is taken
/// right away, otherwise the best fit found is returned, where the search for
/// a better fit is given up at
/// [`LOCALITY_LOOKAHEAD_BLOCKS`](super::LOCALITY_LOOKAHEAD_BLOCKS) +
/// `block_count` past the beginning of the hint's word, unless the hint is
/// located in the very first word. If that fails, the search wraps around and
/// the first sufficiently large free run beginning before the hint's word is
/// returned.
///
/// The returned range covers the full free run at the returned position, its
/// length is at least `block_count`, but might be larger. It's up to the
/// caller to carve the allocation out of it, if desired. `None` is returned if
/// `block_count` is zero, if `hint` is out of bounds or if there is no free run
/// of sufficient length anywhere in the bitmap.
///
/// The bitmap is not modified, it must not change for the duration of the
/// call.
///
/// # Arguments:
///
/// * `bitmap_words` - The allocation bitmap, with a set bit for each
///   allocated block.
/// * `block_count` - The minimum number of contiguous free Allocation Blocks
///   to find.
/// * `hint` - The position to search in the vicinity of.
pub fn find_free_range(
    bitmap_words: &[BitmapWord],
    block_count: layout::AllocBlockCount,
    hint: layout::AllocBlockIndex,
) -> Option<layout::AllocBlockRange> {
    if u64::from(block_count) == 0 {
        log::trace!("find_free_range: empty request");
        return None;
    }

    // Bit positions within the bitmap must be representable.
    let bitmap_words_len = bitmap_words.len() as u64;
    if bitmap_words_len > u64::MAX >> BITMAP_WORD_BITS_LOG2 {
        log::trace!("find_free_range: bitmap of {} words too large", bitmap_words_len);
        return None;
    }

    let hint_bitmap_word_index = bitmap_word_index(u64::from(hint));
    if hint_bitmap_word_index >= bitmap_words_len {
        log::trace!(
            "find_free_range: hint {} beyond bitmap end {}",
            u64::from(hint),
            bitmap_word_begin(bitmap_words_len)
        );
        return None;
    }
    // Less than bitmap_words.len(), hence fits an usize.
    let hint_bitmap_word_index = hint_bitmap_word_index as usize;

    let nearby_free_ranges = FreeRangeIterator::new(&bitmap_words[hint_bitmap_word_index..], block_count);
    if let Some(free_range) = select_free_range(nearby_free_ranges, block_count, hint_bitmap_word_index != 0) {
        let free_range =
            free_range.offset_by(layout::AllocBlockCount::from(bitmap_word_begin(hint_bitmap_word_index as u64)));
        log::trace!(
            "find_free_range: found {} blocks at {} for request of {} near {}",
            u64::from(free_range.block_count()),
            u64::from(free_range.begin()),
            u64::from(block_count),
            u64::from(hint)
        );
        return Some(free_range);
    }

    if hint_bitmap_word_index == 0 {
        // Scanned it all already.
        log::trace!(
            "find_free_range: no free range of {} blocks",
            u64::from(block_count)
        );
        return None;
    }

    // Nothing found from the hint onwards, wrap around. Free runs beginning
    // before the hint's word but crossing into it are still being reported in
    // full.
    let free_range =
        FreeRangeIterator::new_with_begins_limit(bitmap_words, hint_bitmap_word_index, block_count).next();
    match free_range.as_ref() {
        Some(free_range) => log::trace!(
            "find_free_range: found {} blocks at {} for request of {} after wraparound from {}",
            u64::from(free_range.block_count()),
            u64::from(free_range.begin()),
            u64::from(block_count),
            u64::from(hint)
        ),
        None => log::trace!(
            "find_free_range: no free range of {} blocks",
            u64::from(block_count)
        ),
    }
    free_range
}

/// Find the position of a run of free Allocation Blocks, preferably near some
/// hint position.
///
/// Equivalent to [`find_free_range()`], but returns only the found free run's
/// beginning.
pub fn find_free_range_position(
    bitmap_words: &[BitmapWord],
    block_count: layout::AllocBlockCount,
    hint: layout::AllocBlockIndex,
) -> Option<layout::AllocBlockIndex> {
    find_free_range(bitmap_words, block_count, hint).map(|free_range| free_range.begin())
}

#[cfg(test)]
fn test_find_free_range(bitmap_words: &[BitmapWord], block_count: u64, hint: u64) -> Option<(u64, u64)> {
    find_free_range(
        bitmap_words,
        layout::AllocBlockCount::from(block_count),
        layout::AllocBlockIndex::from(hint),
    )
    .map(|free_range| (u64::from(free_range.begin()), u64::from(free_range.block_count())))
}

#[test]
fn test_find_free_range_whole_free_word() {
    assert_eq!(test_find_free_range(&[0], 10, 0), Some((0, 64)));
    assert_eq!(test_find_free_range(&[0], 64, 0), Some((0, 64)));
    assert_eq!(test_find_free_range(&[0], 65, 0), None);
}

#[test]
fn test_find_free_range_skip_allocated_word() {
    assert_eq!(test_find_free_range(&[!0, 0], 5, 0), Some((64, 64)));
}

#[test]
fn test_find_free_range_exact_fit() {
    assert_eq!(test_find_free_range(&[0x41], 5, 0), Some((1, 5)));
    assert_eq!(
        find_free_range_position(
            &[0x41],
            layout::AllocBlockCount::from(5),
            layout::AllocBlockIndex::from(0)
        ),
        Some(layout::AllocBlockIndex::from(1))
    );
}

#[test]
fn test_find_free_range_wraparound() {
    assert_eq!(test_find_free_range(&[0, !0], 5, 64), Some((0, 64)));
    // Free runs crossing into the hint's word are reported in full.
    assert_eq!(test_find_free_range(&[!0 >> 4, !0 << 4, !0], 8, 100), Some((60, 8)));
    assert_eq!(test_find_free_range(&[!0 >> 4, !0 << 4, !0], 9, 100), None);
    // No wraparound if the hint is in the first word.
    assert_eq!(test_find_free_range(&[0xff, !0], 5, 63), Some((8, 56)));
}

#[test]
fn test_find_free_range_invalid_request() {
    assert_eq!(test_find_free_range(&[0], 0, 0), None);
    assert_eq!(test_find_free_range(&[0, 0], 1, 128), None);
    assert_eq!(test_find_free_range(&[0, 0], 1, 127), Some((64, 64)));
    assert_eq!(test_find_free_range(&[], 1, 0), None);
}

#[test]
fn test_find_free_range_locality() {
    // Allocated blocks at 64, 70 and every 16 blocks starting at 128, followed
    // by free words: the 5 block gap at [65, 70) is an exact fit.
    let bitmap = [0, 0x41, 0x0001_0001_0001_0001, 0, 0];
    assert_eq!(test_find_free_range(&bitmap, 5, 64), Some((65, 5)));
    // No exact fit and the 15 block gaps are the best fit. The search stops at
    // the first one past the lookahead distance of 64 + 14 blocks.
    assert_eq!(test_find_free_range(&bitmap, 14, 64), Some((145, 15)));
    // Past the lookahead distance, the better fit found before it gets taken.
    assert_eq!(test_find_free_range(&bitmap, 16, 64), Some((71, 57)));
    // Without locality, the best fit is searched for exhaustively.
    assert_eq!(test_find_free_range(&bitmap, 57, 0), Some((71, 57)));
}

#[test]
fn test_find_free_range_huge_request() {
    assert_eq!(test_find_free_range(&[!0, 0, 0], u64::MAX, 64), None);
    assert_eq!(test_find_free_range(&[0, 0, !0], u64::MAX - 1, 64), None);
}

#[test]
fn test_find_free_range_lookahead_origin() {
    // Free runs of 6 blocks at 134 and of 5 blocks at 144.
    let bitmap = [!0, !0, !((0x3f << 6) | (0x1f << 16))];
    // Relative to the hint's word at 64, the 6 block run is past the
    // lookahead distance of 64 + 5 already and ends the search.
    assert_eq!(test_find_free_range(&bitmap, 5, 127), Some((134, 6)));
    // Relative to the word at 128, the exact fit is within reach.
    assert_eq!(test_find_free_range(&bitmap, 5, 130), Some((144, 5)));
}
