//! Release path: boundary-tag coalescing.
//!
//! ```text
//!   before release(B):          after:
//!   ┌─────┬─────┬─────┐         ┌─────────────────┐
//!   │  A  │  B  │  C  │   ──►   │      A+B+C      │
//!   │free │used │free │         │      free       │
//!   └─────┴─────┴─────┘         └─────────────────┘
//! ```
//!
//! Neighbors are found through B's own header (forward) and A's footer
//! (backward); the fences make both lookups safe at the arena edges.

use std::ptr::NonNull;

use tracing::{trace, warn};

use crate::{
  arena::Arena,
  block::{Block, Tag},
  config::WORD,
  freelist::FreeLists,
  heap::Heap,
};

impl Heap {
  /// Returns a block to the heap, zeroing its payload and merging it with
  /// any free neighbor. Null is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a pointer returned by this heap's allocation
  /// methods that has not been released since. Releasing anything else,
  /// releasing twice, or touching the memory afterwards is undefined
  /// behavior and is not detected.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(ptr) = NonNull::new(ptr) else {
      return;
    };

    let Some(arena) = self.arena.as_mut() else {
      warn!(ptr = ?ptr, "release on a heap that never allocated");
      return;
    };

    let block = arena.block_of(ptr);
    let tag = arena.tag(block);
    debug_assert!(tag.allocated, "double release of {ptr:?}");
    debug_assert_eq!(arena.footer_tag(block), tag, "corrupt boundary tag at {ptr:?}");

    arena.zero(block.payload(), tag.payload_size());
    let merged = coalesce(arena, &mut self.lists, block);

    trace!(
      ptr = ?ptr,
      size = tag.size,
      merged = merged.offset(),
      merged_size = arena.tag(merged).size,
      "released"
    );
  }
}

/// Marks `block` free, folds it into free neighbors and files the result.
/// Returns the surviving block, which is the previous neighbor when that
/// one absorbed it.
pub(crate) fn coalesce(
  arena: &mut Arena,
  lists: &mut FreeLists,
  block: Block,
) -> Block {
  let size = arena.tag(block).size;
  let prev = arena.prev_block(block);
  let next = block.next(size);
  let prev_tag = arena.tag(prev);
  let next_tag = arena.tag(next);

  let (merged, merged_size) = match (prev_tag.allocated, next_tag.allocated) {
    (true, true) => (block, size),
    (true, false) => {
      lists.remove(arena, next);
      clear_seam(arena, next);
      (block, size + next_tag.size)
    }
    (false, true) => {
      lists.remove(arena, prev);
      clear_seam(arena, block);
      (prev, prev_tag.size + size)
    }
    (false, false) => {
      lists.remove(arena, next);
      lists.remove(arena, prev);
      clear_seam(arena, next);
      clear_seam(arena, block);
      (prev, prev_tag.size + size + next_tag.size)
    }
  };

  arena.stamp(merged, Tag::free(merged_size));
  lists.insert(arena, merged);

  merged
}

/// Zeroes the words between `right` and its left neighbor that end up
/// inside a merged payload: the neighbor's footer, then `right`'s header
/// and link words.
fn clear_seam(
  arena: &mut Arena,
  right: Block,
) {
  arena.zero(right.prev_footer(), 4 * WORD);
}
