//! Compile-time layout constants.
//!
//! ```text
//!   Arena as mapped on first use (64 bit):
//!
//!   offset 0        8                                        ARENA_SIZE - 8
//!   ┌──────────┬────────────────────────────────────────────┬──────────┐
//!   │  fence   │ hdr │        one free block           │ ftr │  fence   │
//!   │ 8 | 1    │                                            │ 8 | 1    │
//!   └──────────┴────────────────────────────────────────────┴──────────┘
//! ```

use std::mem;

/// Machine word, also the alignment of every payload.
pub const WORD: usize = mem::size_of::<usize>();

/// Requests are rounded up to a multiple of this.
pub const MIN_ALLOCATION: usize = WORD;

/// Room for the two free-list links.
pub const MIN_PAYLOAD: usize = 2 * WORD;

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WORD;

pub const MIN_BLOCK_SIZE: usize = MIN_PAYLOAD + OVERHEAD;

/// A fence is a lone allocated tag word.
pub const FENCE_SIZE: usize = WORD;

/// Granularity of every mapping request (8 MiB).
pub const ARENA_SIZE: usize = 8 << 20;

/// Number of exact-size buckets; larger free blocks go to the catch-all list.
pub const BUCKET_COUNT: usize = 59;

/// Upper bound on nodes visited in the catch-all list per request.
pub const CATCH_ALL_SCAN_LIMIT: usize = 100;

/// Largest request served: one arena minus both fences and one block overhead.
pub const MAX_ALLOCATION_SIZE: usize = ARENA_SIZE - 4 * WORD;

/// Arena-sized ranges covered by the up-front address space reservation.
/// Growth past it maps directly after the end fence when that range is free.
#[cfg(target_pointer_width = "64")]
pub const RESERVED_ARENAS: usize = 8192;
#[cfg(not(target_pointer_width = "64"))]
pub const RESERVED_ARENAS: usize = 8;

pub const RESERVATION_SIZE: usize = ARENA_SIZE * RESERVED_ARENAS;
