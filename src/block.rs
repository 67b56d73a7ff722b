//! Boundary-tag block layout.
//!
//! ```text
//!   Allocated block:               Free block:
//!   ┌──────────────┐ ◄── Block     ┌──────────────┐
//!   │ size | 1     │   header      │ size | 0     │
//!   ├──────────────┤ ◄── payload   ├──────────────┤
//!   │              │               │ prev link    │
//!   │   user data  │               │ next link    │
//!   │              │               │ (zeroed)     │
//!   ├──────────────┤               ├──────────────┤
//!   │ size | 1     │   footer      │ size | 0     │
//!   └──────────────┘               └──────────────┘
//! ```
//!
//! Sizes count header and footer and are always word multiples, which leaves
//! the low three bits of a tag word for flags. Only bit 0 is used.

use crate::config::{OVERHEAD, WORD};

const ALLOCATED: usize = 0x1;
const SIZE_MASK: usize = !0x7;

/// Decoded header or footer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
  pub size: usize,
  pub allocated: bool,
}

impl Tag {
  pub const fn new(
    size: usize,
    allocated: bool,
  ) -> Self {
    Self { size, allocated }
  }

  pub const fn free(size: usize) -> Self {
    Self::new(size, false)
  }

  pub const fn used(size: usize) -> Self {
    Self::new(size, true)
  }

  pub const fn encode(self) -> usize {
    (self.size & SIZE_MASK) | if self.allocated { ALLOCATED } else { 0 }
  }

  pub const fn decode(word: usize) -> Self {
    Self {
      size: word & SIZE_MASK,
      allocated: word & ALLOCATED != 0,
    }
  }

  /// Usable bytes between header and footer.
  pub const fn payload_size(self) -> usize {
    self.size - OVERHEAD
  }
}

/// A block, named by the offset of its header from the arena base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(usize);

impl Block {
  pub const fn at(offset: usize) -> Self {
    Self(offset)
  }

  pub const fn offset(self) -> usize {
    self.0
  }

  pub const fn payload(self) -> usize {
    self.0 + WORD
  }

  pub const fn from_payload(payload: usize) -> Self {
    Self(payload - WORD)
  }

  pub const fn footer(
    self,
    size: usize,
  ) -> usize {
    self.0 + size - WORD
  }

  /// Word holding the back link while the block is free.
  pub const fn prev_link(self) -> usize {
    self.0 + WORD
  }

  /// Word holding the forward link while the block is free.
  pub const fn next_link(self) -> usize {
    self.0 + 2 * WORD
  }

  /// Physically following block.
  pub const fn next(
    self,
    size: usize,
  ) -> Self {
    Self(self.0 + size)
  }

  /// Footer of the physically preceding block.
  pub const fn prev_footer(self) -> usize {
    self.0 - WORD
  }

  /// Physically preceding block, given the size read from its footer.
  pub const fn prev(
    self,
    prev_size: usize,
  ) -> Self {
    Self(self.0 - prev_size)
  }
}
