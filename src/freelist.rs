//! Segregated free lists.
//!
//! ```text
//!   buckets[0]  (16 byte payloads)  ──► blk ◄──► blk ◄──► blk
//!   buckets[1]  (24 byte payloads)  ──► ∅
//!   ...
//!   buckets[58] (480 byte payloads) ──► blk
//!   other       (anything larger)   ──► blk ◄──► blk
//! ```
//!
//! Links live in the first two payload words of each free block, so both
//! operations are O(1) and the lists need no storage of their own.

use crate::{
  arena::Arena,
  block::Block,
  config::{BUCKET_COUNT, MIN_ALLOCATION},
};

/// Which list a free block of a given payload size belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
  Bucket(usize),
  Other,
}

impl SizeClass {
  pub const fn of(payload: usize) -> Self {
    let index = payload / MIN_ALLOCATION - 2;
    if index < BUCKET_COUNT {
      Self::Bucket(index)
    } else {
      Self::Other
    }
  }
}

pub struct FreeLists {
  buckets: [Option<Block>; BUCKET_COUNT],
  other: Option<Block>,
}

impl FreeLists {
  pub const fn new() -> Self {
    Self {
      buckets: [None; BUCKET_COUNT],
      other: None,
    }
  }

  fn head_mut(
    &mut self,
    class: SizeClass,
  ) -> &mut Option<Block> {
    match class {
      SizeClass::Bucket(index) => &mut self.buckets[index],
      SizeClass::Other => &mut self.other,
    }
  }

  pub fn head(
    &self,
    class: SizeClass,
  ) -> Option<Block> {
    match class {
      SizeClass::Bucket(index) => self.buckets[index],
      SizeClass::Other => self.other,
    }
  }

  /// Head of the first non-empty bucket at `from` or above.
  pub fn first_from(
    &self,
    from: usize,
  ) -> Option<Block> {
    self.buckets.iter().skip(from).find_map(|head| *head)
  }

  /// Files a free block at the front of the list its current size selects.
  pub fn insert(
    &mut self,
    arena: &mut Arena,
    block: Block,
  ) {
    let tag = arena.tag(block);
    debug_assert!(!tag.allocated, "inserting allocated block {block:?}");

    let head = self.head_mut(SizeClass::of(tag.payload_size()));

    arena.set_prev_free(block, None);
    arena.set_next_free(block, *head);

    if let Some(old) = *head {
      arena.set_prev_free(old, Some(block));
    }

    *head = Some(block);
  }

  /// Unlinks a block from whichever list holds it.
  pub fn remove(
    &mut self,
    arena: &mut Arena,
    block: Block,
  ) {
    let prev = arena.prev_free(block);
    let next = arena.next_free(block);

    if let Some(next) = next {
      arena.set_prev_free(next, prev);
    }

    match prev {
      Some(prev) => arena.set_next_free(prev, next),
      None => {
        let class = SizeClass::of(arena.tag(block).payload_size());
        *self.head_mut(class) = next;
      }
    }
  }

  pub fn clear(&mut self) {
    *self = Self::new();
  }
}

impl Default for FreeLists {
  fn default() -> Self {
    Self::new()
  }
}
