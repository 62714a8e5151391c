// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Randomized tests checking the free space search against a bit-by-bit
//! reference scan.

extern crate alloc;
use alloc::vec::Vec;

use super::{BitmapWord, FreeRangeIterator, find_free_range};
use crate::layout;
use rand::{Rng as _, SeedableRng as _, rngs::SmallRng};

/// Produce a bitmap with a mix of free, allocated, sparse and dense words.
fn random_bitmap(rng: &mut SmallRng, max_words: u64) -> Vec<BitmapWord> {
    let len = rng.gen_range(0..=max_words);
    (0..len)
        .map(|_| match rng.gen_range(0..6) {
            0 => 0,
            1 => !0,
            2 => rng.r#gen::<u64>(),
            3 => rng.r#gen::<u64>() & rng.r#gen::<u64>() & rng.r#gen::<u64>(),
            4 => rng.r#gen::<u64>() | rng.r#gen::<u64>() | rng.r#gen::<u64>(),
            _ => 1 << rng.gen_range(0..64),
        })
        .collect()
}

fn is_allocated(bitmap_words: &[BitmapWord], pos: u64) -> bool {
    bitmap_words[(pos / 64) as usize] & (1 << (pos % 64)) != 0
}

/// All maximal free runs as `(begin, end)`, found one bit at a time.
fn reference_free_runs(bitmap_words: &[BitmapWord]) -> Vec<(u64, u64)> {
    let bitmap_len = bitmap_words.len() as u64 * 64;
    let mut free_runs = Vec::new();
    let mut free_run_begin = None;
    for pos in 0..bitmap_len {
        match (is_allocated(bitmap_words, pos), free_run_begin) {
            (true, Some(begin)) => {
                free_runs.push((begin, pos));
                free_run_begin = None;
            }
            (false, None) => free_run_begin = Some(pos),
            _ => (),
        }
    }
    if let Some(begin) = free_run_begin {
        free_runs.push((begin, bitmap_len));
    }
    free_runs
}

fn collect_free_runs(iter: FreeRangeIterator<'_>) -> Vec<(u64, u64)> {
    iter.map(|r| (u64::from(r.begin()), u64::from(r.end()))).collect()
}

fn search(bitmap_words: &[BitmapWord], block_count: u64, hint: u64) -> Option<(u64, u64)> {
    find_free_range(
        bitmap_words,
        layout::AllocBlockCount::from(block_count),
        layout::AllocBlockIndex::from(hint),
    )
    .map(|r| (u64::from(r.begin()), u64::from(r.end())))
}

fn random_block_count(rng: &mut SmallRng) -> u64 {
    match rng.gen_range(0..3) {
        0 => rng.gen_range(1..=8),
        1 => rng.gen_range(1..=64),
        _ => rng.gen_range(1..=256),
    }
}

#[test]
fn test_free_range_iterator_random() {
    let mut rng = SmallRng::seed_from_u64(0x5eed_0001);
    for _ in 0..2000 {
        let bitmap_words = random_bitmap(&mut rng, 6);
        let min_block_count = random_block_count(&mut rng);
        let expected: Vec<(u64, u64)> = reference_free_runs(&bitmap_words)
            .into_iter()
            .filter(|(begin, end)| end - begin >= min_block_count)
            .collect();
        let mut iter = FreeRangeIterator::new(&bitmap_words, layout::AllocBlockCount::from(min_block_count));
        assert_eq!(collect_free_runs(iter), expected, "bitmap {:x?}", bitmap_words);

        let begins_end = rng.gen_range(0..bitmap_words.len() as u64 + 1);
        let expected: Vec<(u64, u64)> = expected
            .into_iter()
            .filter(|(begin, _)| *begin < begins_end * 64)
            .collect();
        iter = FreeRangeIterator::new_with_begins_limit(
            &bitmap_words,
            begins_end as usize,
            layout::AllocBlockCount::from(min_block_count),
        );
        assert_eq!(
            collect_free_runs(iter),
            expected,
            "bitmap {:x?}, begins end {}",
            bitmap_words,
            begins_end
        );
    }
}

#[test]
fn test_find_free_range_random() {
    let mut rng = SmallRng::seed_from_u64(0x5eed_0002);
    for _ in 0..4000 {
        let bitmap_words = random_bitmap(&mut rng, 6);
        if bitmap_words.is_empty() {
            continue;
        }
        let bitmap_len = bitmap_words.len() as u64 * 64;
        let block_count = random_block_count(&mut rng);
        let hint = rng.gen_range(0..bitmap_len);
        let hint_word_begin = hint / 64 * 64;

        let free_runs = reference_free_runs(&bitmap_words);
        let any_fits = free_runs.iter().any(|(begin, end)| end - begin >= block_count);

        let Some((begin, end)) = search(&bitmap_words, block_count, hint) else {
            assert!(!any_fits, "bitmap {:x?}, request {} near {}", bitmap_words, block_count, hint);
            continue;
        };

        // The returned range is free, sufficiently large and extends up to
        // the next allocated block.
        assert!(end - begin >= block_count);
        assert!((begin..end).all(|pos| !is_allocated(&bitmap_words, pos)));
        assert!(end == bitmap_len || is_allocated(&bitmap_words, end));
        // It starts at an allocated block's successor, unless it got cut at
        // the hint's word.
        assert!(begin == 0 || begin == hint_word_begin || is_allocated(&bitmap_words, begin - 1));

        // Anything before the hint's word is taken only if nothing
        // sufficiently large exists from there onwards.
        if begin < hint_word_begin {
            assert!(
                !free_runs
                    .iter()
                    .any(|(b, e)| *e > hint_word_begin && e - (*b).max(hint_word_begin) >= block_count),
                "bitmap {:x?}, request {} near {}",
                bitmap_words,
                block_count,
                hint
            );
        }
    }
}

#[test]
fn test_find_free_range_best_fit_random() {
    let mut rng = SmallRng::seed_from_u64(0x5eed_0003);
    for _ in 0..2000 {
        let bitmap_words = random_bitmap(&mut rng, 6);
        if bitmap_words.is_empty() {
            continue;
        }
        let block_count = random_block_count(&mut rng);
        // Without locality, the first of the smallest sufficiently large
        // free runs is taken.
        let mut expected: Option<(u64, u64)> = None;
        for (begin, end) in reference_free_runs(&bitmap_words) {
            if end - begin >= block_count && expected.is_none_or(|(b, e)| end - begin < e - b) {
                expected = Some((begin, end));
            }
        }
        let hint = rng.gen_range(0..64);
        assert_eq!(
            search(&bitmap_words, block_count, hint),
            expected,
            "bitmap {:x?}, request {}",
            bitmap_words,
            block_count
        );
    }
}

fn set_allocated(bitmap_words: &mut [BitmapWord], pos: u64, value: bool) {
    if let Some(bitmap_word) = bitmap_words.get_mut((pos / 64) as usize) {
        if value {
            *bitmap_word |= 1 << (pos % 64);
        } else {
            *bitmap_word &= !(1 << (pos % 64));
        }
    }
}

#[test]
fn test_find_free_range_locality_random() {
    let mut rng = SmallRng::seed_from_u64(0x5eed_0004);
    for _ in 0..4000 {
        let mut bitmap_words = random_bitmap(&mut rng, 8);
        if bitmap_words.len() < 2 {
            continue;
        }
        let block_count = random_block_count(&mut rng);
        let hint_word = rng.gen_range(1..bitmap_words.len() as u64);
        let hint_word_begin = hint_word * 64;
        let lookahead_end = super::LOCALITY_LOOKAHEAD_BLOCKS + block_count;

        // Most of the time, plant an exact fit somewhere up to the lookahead
        // distance.
        if rng.gen_range(0..4) != 0 {
            let begin = hint_word_begin + rng.gen_range(0..=lookahead_end);
            set_allocated(&mut bitmap_words, begin - 1, true);
            for pos in begin..begin + block_count {
                set_allocated(&mut bitmap_words, pos, false);
            }
            set_allocated(&mut bitmap_words, begin + block_count, true);
        }

        // Free runs as seen from the hint's word, cut at its beginning.
        let exact_fit = reference_free_runs(&bitmap_words)
            .into_iter()
            .filter(|(_, end)| *end > hint_word_begin)
            .map(|(begin, end)| (begin.max(hint_word_begin), end))
            .find(|(begin, end)| end - begin == block_count && begin - hint_word_begin <= lookahead_end);
        if let Some(exact_fit) = exact_fit {
            assert_eq!(
                search(&bitmap_words, block_count, hint_word_begin + rng.gen_range(0..64)),
                Some(exact_fit),
                "bitmap {:x?}, request {} in word {}",
                bitmap_words,
                block_count,
                hint_word
            );
        }
    }
}
