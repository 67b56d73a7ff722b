//! # tagalloc - A Segregated Free-List Memory Allocator
//!
//! This crate provides a general-purpose `allocate` / `release` pair backed
//! directly by anonymous `mmap(2)` memory, without going through the
//! platform allocator.
//!
//! ## Overview
//!
//! Memory is handed out from one contiguous arena. Every block carries a
//! boundary tag at both ends, free blocks are threaded onto per-size lists,
//! and released blocks are merged with free neighbors right away:
//!
//! ```text
//!   Arena:
//!
//!   ┌───────┬───────────┬─────────┬───────────────────┬─────────┬───────┐
//!   │ fence │  A  used  │ B  free │      C  used      │ D  free │ fence │
//!   └───────┴───────────┴─────────┴───────────────────┴─────────┴───────┘
//!                            │                             │
//!   Free lists:              │                             │
//!                            ▼                             │
//!   buckets[i] (B's size) ──► B                            │
//!   other (large blocks)  ────────────────────────────────►D
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Rounding macro (align!)
//!   ├── config     - Layout constants (arena size, buckets, limits)
//!   ├── error      - AllocError
//!   ├── block      - Boundary-tag encoding and block navigation (internal)
//!   ├── arena      - Fenced arena over an mmap reservation (internal)
//!   ├── freelist   - Size-class buckets plus a catch-all list (internal)
//!   ├── heap       - Heap: fit search, splitting, arena extension
//!   ├── coalesce   - Heap::release and neighbor merging (internal)
//!   ├── global     - Process-wide locked heap
//!   └── logging    - tracing subscriber setup
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::Heap;
//!
//! let mut heap = Heap::new();
//!
//! let ptr = heap.allocate(64) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     *ptr = 42;
//!     assert_eq!(*ptr, 42);
//!
//!     heap.release(ptr as *mut u8);
//! }
//! ```
//!
//! Or through the shared instance:
//!
//! ```rust
//! let ptr = tagalloc::allocate(16);
//! unsafe { tagalloc::release(ptr) };
//! ```
//!
//! ## How It Works
//!
//! - **Fit search**: the request's size class and every larger bucket are
//!   checked first; the first non-empty one wins. Otherwise at most 100
//!   blocks of the catch-all list are scanned for an exact or splittable fit.
//! - **Splitting**: a block with room for another minimal block is cut in
//!   two; the upper part is handed out, the lower part stays free.
//! - **Extension**: when nothing fits, another arena-sized range is mapped
//!   right after the end fence. The old fence becomes the header of the new
//!   block and the rest of the range becomes a free block.
//! - **Coalescing**: on release, both physical neighbors are inspected via
//!   their boundary tags and merged when free.
//! - **Zeroing**: released payloads are wiped, so every allocation reads as
//!   zero until written.
//!
//! ## Limitations
//!
//! - **No thread safety on `Heap`**: use the global functions, which lock.
//! - **No shrinking**: address space is never given back while a heap lives.
//! - **No reallocation** and nothing above [`MAX_ALLOCATION_SIZE`] bytes.
//! - **Unchecked release**: releasing a foreign or already released pointer
//!   is undefined behavior.
//! - **Unix-only**: requires `libc` and `mmap`.
//!
//! ## Safety
//!
//! Allocation is safe; releasing is `unsafe` because the allocator trusts
//! the pointer it is given.

pub mod align;
mod arena;
mod block;
mod coalesce;
pub mod config;
mod error;
mod freelist;
mod global;
mod heap;
pub mod logging;
mod os;

pub use config::MAX_ALLOCATION_SIZE;
pub use error::AllocError;
pub use global::{allocate, release, try_allocate};
pub use heap::Heap;
