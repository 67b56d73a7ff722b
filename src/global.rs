//! The process-wide heap.
//!
//! One [`Heap`] behind one lock. It maps its arena on the first request and
//! lives until the process exits.

use std::ptr::NonNull;

use parking_lot::{Mutex, const_mutex};

use crate::{error::AllocError, heap::Heap};

static HEAP: Mutex<Heap> = const_mutex(Heap::new());

/// Allocates `size` bytes from the process-wide heap.
///
/// Returns null for a zero-sized request and on failure; failures also set
/// `errno` to `ENOMEM`. The memory is word-aligned and reads as zero.
pub fn allocate(size: usize) -> *mut u8 {
  HEAP.lock().allocate(size)
}

/// Fallible flavor of [`allocate`].
pub fn try_allocate(size: usize) -> Result<Option<NonNull<u8>>, AllocError> {
  HEAP.lock().try_allocate(size)
}

/// Returns memory to the process-wide heap. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or come from [`allocate`] / [`try_allocate`] and not
/// have been released yet. Anything else is undefined behavior.
pub unsafe fn release(ptr: *mut u8) {
  unsafe { HEAP.lock().release(ptr) }
}
