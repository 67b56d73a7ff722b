//! Arena manager: fenced, OS-backed memory.
//!
//! A large range is reserved up front with no access rights; arenas are
//! then mapped read-write into it back to back, so an extension always lands
//! right after the current end fence. Once the reservation is used up, the
//! next range is mapped directly after it, but only if nothing else lives
//! there.
//!
//! ```text
//!               ├──────── committed ────────┤
//!   ┌───────┬───────────────────────┬───────┬ ─ ─ ─ ─ ─ ─ ─ ┬ ─ ─ ─ ─ ─ ─ ┐
//!   │ fence │   blocks ...          │ fence │   PROT_NONE   │  unmapped
//!   └───────┴───────────────────────┴───────┴ ─ ─ ─ ─ ─ ─ ─ ┴ ─ ─ ─ ─ ─ ─ ┘
//!   ▲                               ▲                       ▲
//!   base (offset 0)                 end_fence               reserved
//! ```

use std::{ptr, ptr::NonNull};

use tracing::debug;

use crate::{
  align,
  block::{Block, Tag},
  config::{ARENA_SIZE, FENCE_SIZE, MIN_BLOCK_SIZE, OVERHEAD, RESERVATION_SIZE, WORD},
  error::AllocError,
  os,
};

/// The start fence sits at offset 0, which is also how an empty link reads.
pub const START_FENCE: Block = Block::at(0);

const NO_LINK: usize = START_FENCE.offset();

/// Result of growing the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
  /// Allocated block covering the request, not in any list.
  pub block: Block,
  /// Unused tail of the new mapping, free and not yet filed.
  pub remainder: Option<Block>,
}

pub struct Arena {
  base: NonNull<u8>,
  reserved: usize,
  end_fence: Block,
}

// The arena exclusively owns its reservation; raw access never escapes
// without going through `&mut self` on the owning heap.
unsafe impl Send for Arena {}

impl Arena {
  /// Reserves the address range, maps the first arena into it and installs
  /// both fences around a single free block, which is returned unfiled.
  pub fn map() -> Result<(Self, Block), AllocError> {
    let base = os::reserve(RESERVATION_SIZE)?;
    unsafe { Self::install(base, RESERVATION_SIZE) }
  }

  /// Builds the arena over an existing reservation of `reserved` bytes.
  ///
  /// # Safety
  ///
  /// `base` must come from [`os::reserve`] with at least `reserved` bytes,
  /// `reserved` must be a multiple of `ARENA_SIZE`, and the arena takes
  /// ownership of the range.
  unsafe fn install(
    base: NonNull<u8>,
    reserved: usize,
  ) -> Result<(Self, Block), AllocError> {
    // Anonymous mappings come back zero-filled.
    if let Err(err) = unsafe { os::commit(base, ARENA_SIZE) } {
      unsafe { os::release(base, reserved) };
      return Err(err);
    }

    let mut arena = Self {
      base,
      reserved,
      end_fence: Block::at(ARENA_SIZE - FENCE_SIZE),
    };

    arena.write(START_FENCE.offset(), Tag::used(FENCE_SIZE).encode());
    arena.write(arena.end_fence.offset(), Tag::used(FENCE_SIZE).encode());

    let block = Block::at(FENCE_SIZE);
    arena.stamp(block, Tag::free(ARENA_SIZE - 2 * FENCE_SIZE));

    debug!(
      base = ?base,
      reserved,
      committed = ARENA_SIZE,
      "mapped arena"
    );

    Ok((arena, block))
  }

  /// Maps enough arena-sized ranges after the end fence to hold `payload`
  /// bytes, turns the old end fence into the header of an allocated block
  /// of exactly that payload and fences off the new end.
  ///
  /// Slack of at least one minimal block becomes a trailing free block;
  /// anything smaller is folded into the allocated block.
  pub fn extend(
    &mut self,
    payload: usize,
  ) -> Result<Extension, AllocError> {
    let needed = payload + OVERHEAD;
    let len = align!(needed, ARENA_SIZE);

    let start = self.committed();
    let end = start + len;

    // Inside the reservation `commit` may overwrite freely; past it only a
    // non-clobbering mapping is safe.
    let inside = end.min(self.reserved).saturating_sub(start);
    if inside > 0 {
      unsafe { os::commit(self.at(start), inside)? };
    }
    if inside < len {
      os::map_at(self.at(start + inside), len - inside)?;
    }

    let block = self.end_fence;
    let slack = len - needed;

    self.end_fence = Block::at(block.offset() + len);
    self.write(self.end_fence.offset(), Tag::used(FENCE_SIZE).encode());

    let remainder = if slack >= MIN_BLOCK_SIZE {
      self.stamp(block, Tag::used(needed));
      let tail = block.next(needed);
      self.stamp(tail, Tag::free(slack));
      Some(tail)
    } else {
      self.stamp(block, Tag::used(len));
      None
    };

    debug!(
      at = ?self.base.as_ptr().wrapping_add(start),
      len,
      committed = self.committed(),
      "extended arena"
    );

    Ok(Extension { block, remainder })
  }

  fn at(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(self.base.as_ptr().wrapping_add(offset)) }
  }

  /// Bytes currently mapped read-write, end fence included.
  pub fn committed(&self) -> usize {
    self.end_fence.offset() + FENCE_SIZE
  }

  #[cfg(test)]
  pub fn end_fence(&self) -> Block {
    self.end_fence
  }

  #[inline]
  fn check(
    &self,
    offset: usize,
    len: usize,
  ) {
    assert!(
      offset % WORD == 0 && offset + len <= self.committed(),
      "arena access at {offset:#x}+{len} outside committed {:#x}",
      self.committed()
    );
  }

  pub fn read(
    &self,
    offset: usize,
  ) -> usize {
    self.check(offset, WORD);
    unsafe { ptr::read(self.base.as_ptr().add(offset) as *const usize) }
  }

  pub fn write(
    &mut self,
    offset: usize,
    value: usize,
  ) {
    self.check(offset, WORD);
    unsafe { ptr::write(self.base.as_ptr().add(offset) as *mut usize, value) }
  }

  pub fn zero(
    &mut self,
    offset: usize,
    len: usize,
  ) {
    self.check(offset, len);
    unsafe { ptr::write_bytes(self.base.as_ptr().add(offset), 0, len) }
  }

  pub fn tag(
    &self,
    block: Block,
  ) -> Tag {
    Tag::decode(self.read(block.offset()))
  }

  pub fn footer_tag(
    &self,
    block: Block,
  ) -> Tag {
    let size = self.tag(block).size;
    Tag::decode(self.read(block.footer(size)))
  }

  /// Writes `tag` to both the header and the footer it implies.
  pub fn stamp(
    &mut self,
    block: Block,
    tag: Tag,
  ) {
    self.write(block.offset(), tag.encode());
    self.write(block.footer(tag.size), tag.encode());
  }

  pub fn next_block(
    &self,
    block: Block,
  ) -> Block {
    block.next(self.tag(block).size)
  }

  pub fn prev_block(
    &self,
    block: Block,
  ) -> Block {
    let prev = Tag::decode(self.read(block.prev_footer()));
    block.prev(prev.size)
  }

  pub fn prev_free(
    &self,
    block: Block,
  ) -> Option<Block> {
    decode_link(self.read(block.prev_link()))
  }

  pub fn next_free(
    &self,
    block: Block,
  ) -> Option<Block> {
    decode_link(self.read(block.next_link()))
  }

  pub fn set_prev_free(
    &mut self,
    block: Block,
    link: Option<Block>,
  ) {
    self.write(block.prev_link(), encode_link(link));
  }

  pub fn set_next_free(
    &mut self,
    block: Block,
    link: Option<Block>,
  ) {
    self.write(block.next_link(), encode_link(link));
  }

  pub fn clear_links(
    &mut self,
    block: Block,
  ) {
    self.zero(block.prev_link(), 2 * WORD);
  }

  pub fn payload_ptr(
    &self,
    block: Block,
  ) -> NonNull<u8> {
    self.check(block.payload(), 0);
    unsafe { NonNull::new_unchecked(self.base.as_ptr().add(block.payload())) }
  }

  pub fn contains(
    &self,
    ptr: *const u8,
  ) -> bool {
    let base = self.base.as_ptr() as usize;
    let addr = ptr as usize;
    addr > base && addr < base + self.committed()
  }

  /// Block whose payload starts at `ptr`.
  pub fn block_of(
    &self,
    ptr: NonNull<u8>,
  ) -> Block {
    assert!(self.contains(ptr.as_ptr()), "pointer {ptr:?} not owned by this arena");
    Block::from_payload(ptr.as_ptr() as usize - self.base.as_ptr() as usize)
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    debug!(base = ?self.base, "unmapping arena");
    unsafe { os::release(self.base, self.reserved.max(self.committed())) };
  }
}

fn encode_link(link: Option<Block>) -> usize {
  link.map_or(NO_LINK, Block::offset)
}

fn decode_link(word: usize) -> Option<Block> {
  (word != NO_LINK).then(|| Block::at(word))
}
