// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

#![no_std]

// Lifetimes are not always obvious at first sight, allow for making them explicit even if
// redundant.
#![allow(clippy::needless_lifetimes)]

use extalloc_utils_common as utils_common;

pub mod alloc_bitmap;
pub mod layout;
