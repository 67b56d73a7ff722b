//! The allocator context and its allocation path.

use std::ptr::{self, NonNull};

use tracing::{trace, warn};

use crate::{
  align,
  arena::Arena,
  block::{Block, Tag},
  config::{CATCH_ALL_SCAN_LIMIT, MAX_ALLOCATION_SIZE, MIN_ALLOCATION, MIN_BLOCK_SIZE, MIN_PAYLOAD, OVERHEAD},
  error::AllocError,
  freelist::{FreeLists, SizeClass},
  os,
};

/// A free-list allocator over one growable, fenced arena.
///
/// The arena is mapped lazily on the first request. Everything handed out
/// stays valid until released or until the heap is dropped, which unmaps
/// the whole arena.
///
/// A `Heap` is `Send` but every operation needs `&mut self`; see
/// [`crate::allocate`] for the shared, locked instance.
pub struct Heap {
  pub(crate) arena: Option<Arena>,
  pub(crate) lists: FreeLists,
}

impl Heap {
  pub const fn new() -> Self {
    Self {
      arena: None,
      lists: FreeLists::new(),
    }
  }

  /// Returns zeroed, word-aligned memory for `size` bytes.
  ///
  /// `Ok(None)` for a zero-sized request.
  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<NonNull<u8>>, AllocError> {
    if size == 0 {
      return Ok(None);
    }

    if size > MAX_ALLOCATION_SIZE {
      return Err(AllocError::OutOfRange {
        requested: size,
        max: MAX_ALLOCATION_SIZE,
      });
    }

    let payload = round_request(size);
    let (arena, lists) = self.parts()?;

    let block = match find_fit(arena, lists, payload) {
      Some(block) => carve(arena, lists, block, payload),
      None => {
        let ext = arena.extend(payload)?;
        if let Some(rest) = ext.remainder {
          lists.insert(arena, rest);
        }
        ext.block
      }
    };

    let ptr = arena.payload_ptr(block);
    trace!(size, block = block.offset(), ptr = ?ptr, "allocated");

    Ok(Some(ptr))
  }

  /// Like [`Heap::try_allocate`], but reports failure as a null pointer and
  /// sets `errno` to `ENOMEM` where the platform has one.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    match self.try_allocate(size) {
      Ok(Some(ptr)) => ptr.as_ptr(),
      Ok(None) => ptr::null_mut(),
      Err(err) => {
        warn!(size, %err, "allocation failed");
        os::set_enomem();
        ptr::null_mut()
      }
    }
  }

  /// The arena and its lists, mapping the arena first if needed.
  fn parts(&mut self) -> Result<(&mut Arena, &mut FreeLists), AllocError> {
    let arena = match self.arena.take() {
      Some(arena) => arena,
      None => {
        let (mut arena, block) = Arena::map()?;
        self.lists.clear();
        self.lists.insert(&mut arena, block);
        arena
      }
    };

    Ok((self.arena.insert(arena), &mut self.lists))
  }
}

impl Default for Heap {
  fn default() -> Self {
    Self::new()
  }
}

/// Payload actually reserved for a request: a whole number of allocation
/// units, and never less than the two link words a free block needs.
pub fn round_request(size: usize) -> usize {
  align!(size, MIN_ALLOCATION).max(MIN_PAYLOAD)
}

/// First fit across size classes, then a bounded walk of the catch-all list.
fn find_fit(
  arena: &Arena,
  lists: &FreeLists,
  payload: usize,
) -> Option<Block> {
  if let SizeClass::Bucket(index) = SizeClass::of(payload) {
    if let Some(block) = lists.first_from(index) {
      return Some(block);
    }
  }

  let needed = payload + OVERHEAD;
  let mut cursor = lists.head(SizeClass::Other);

  for _ in 0..CATCH_ALL_SCAN_LIMIT {
    let block = cursor?;
    let size = arena.tag(block).size;

    if size == needed || size >= needed + MIN_BLOCK_SIZE {
      return Some(block);
    }

    cursor = arena.next_free(block);
  }

  None
}

/// Hands out `block` for `payload` bytes, splitting when the leftover can
/// stand as a free block of its own.
fn carve(
  arena: &mut Arena,
  lists: &mut FreeLists,
  block: Block,
  payload: usize,
) -> Block {
  let size = arena.tag(block).size;
  let needed = payload + OVERHEAD;

  if size - needed >= MIN_BLOCK_SIZE {
    return split(arena, lists, block, needed);
  }

  lists.remove(arena, block);
  arena.stamp(block, Tag::used(size));
  arena.clear_links(block);

  block
}

/// Shrinks `block` in place, refiles it, and returns a new allocated block
/// of `needed` bytes cut from its upper end.
fn split(
  arena: &mut Arena,
  lists: &mut FreeLists,
  block: Block,
  needed: usize,
) -> Block {
  let size = arena.tag(block).size;
  let rest = size - needed;

  lists.remove(arena, block);
  arena.stamp(block, Tag::free(rest));
  lists.insert(arena, block);

  let carved = block.next(rest);
  arena.stamp(carved, Tag::used(needed));
  arena.clear_links(carved);

  carved
}

#[cfg(test)]
impl Heap {
  /// Tag of the block whose payload is `ptr`.
  pub(crate) fn tag_of(
    &self,
    ptr: *mut u8,
  ) -> Tag {
    let arena = self.arena.as_ref().expect("heap has no arena");
    arena.tag(arena.block_of(NonNull::new(ptr).expect("null pointer")))
  }

  /// Walks every block and every list, asserting the layout invariants.
  pub(crate) fn check(&self) {
    use std::collections::HashSet;

    use crate::{
      arena::START_FENCE,
      config::{BUCKET_COUNT, FENCE_SIZE, WORD},
    };

    let Some(arena) = self.arena.as_ref() else {
      return;
    };

    assert_eq!(arena.tag(START_FENCE), Tag::used(FENCE_SIZE));
    assert_eq!(arena.tag(arena.end_fence()), Tag::used(FENCE_SIZE));

    let mut free = HashSet::new();
    let mut block = Block::at(FENCE_SIZE);
    let mut prev_free = false;

    while block != arena.end_fence() {
      let tag = arena.tag(block);
      assert_eq!(arena.footer_tag(block), tag, "boundary tags differ at {block:?}");
      assert_eq!(tag.size % WORD, 0, "unaligned size at {block:?}");
      assert!(tag.size >= MIN_BLOCK_SIZE, "undersized block at {block:?}");
      assert!(!(prev_free && !tag.allocated), "adjacent free blocks at {block:?}");

      if !tag.allocated {
        free.insert(block);
      }

      prev_free = !tag.allocated;
      block = block.next(tag.size);
    }

    assert_eq!(block.offset() + FENCE_SIZE, arena.committed());

    let classes = (0..BUCKET_COUNT).map(SizeClass::Bucket).chain([SizeClass::Other]);
    let mut listed = HashSet::new();

    for class in classes {
      let mut prev = None;
      let mut cursor = self.lists.head(class);

      while let Some(block) = cursor {
        let tag = arena.tag(block);
        assert!(!tag.allocated, "allocated block {block:?} in a free list");
        assert_eq!(SizeClass::of(tag.payload_size()), class, "{block:?} filed in wrong class");
        assert_eq!(arena.prev_free(block), prev, "broken back link at {block:?}");
        assert!(listed.insert(block), "{block:?} listed twice");

        prev = Some(block);
        cursor = arena.next_free(block);
      }
    }

    assert_eq!(free, listed, "free blocks and listed blocks differ");
  }
}

#[cfg(test)]
mod tests {
  use std::slice;

  use proptest::prelude::*;

  use super::*;
  use crate::config::{ARENA_SIZE, BUCKET_COUNT, WORD};

  unsafe fn fill(
    ptr: *mut u8,
    len: usize,
    byte: u8,
  ) {
    unsafe { ptr::write_bytes(ptr, byte, len) };
  }

  unsafe fn is_filled(
    ptr: *mut u8,
    len: usize,
    byte: u8,
  ) -> bool {
    unsafe { slice::from_raw_parts(ptr, len) }.iter().all(|&b| b == byte)
  }

  #[test]
  fn test_round_request() {
    assert_eq!(round_request(1), MIN_PAYLOAD);
    assert_eq!(round_request(WORD), MIN_PAYLOAD);
    assert_eq!(round_request(2 * WORD), 2 * WORD);
    assert_eq!(round_request(2 * WORD + 1), 3 * WORD);
    assert_eq!(round_request(MAX_ALLOCATION_SIZE), MAX_ALLOCATION_SIZE);
  }

  #[test]
  fn test_zero_size_is_not_an_error() {
    let mut heap = Heap::new();
    assert_eq!(heap.try_allocate(0), Ok(None));
    assert!(heap.allocate(0).is_null());
    assert!(heap.arena.is_none());
  }

  #[test]
  fn test_oversize_is_out_of_range() {
    let mut heap = Heap::new();
    assert_eq!(
      heap.try_allocate(MAX_ALLOCATION_SIZE + 1),
      Err(AllocError::OutOfRange {
        requested: MAX_ALLOCATION_SIZE + 1,
        max: MAX_ALLOCATION_SIZE,
      })
    );
    assert!(heap.allocate(MAX_ALLOCATION_SIZE + 1).is_null());

    assert!(!heap.allocate(64).is_null());
    assert!(heap.allocate(MAX_ALLOCATION_SIZE + 1).is_null());
    heap.check();
  }

  #[test]
  fn test_maximum_fits_fresh_arena() {
    let mut heap = Heap::new();
    let ptr = heap.allocate(MAX_ALLOCATION_SIZE);
    assert!(!ptr.is_null());

    let arena = heap.arena.as_ref().unwrap();
    assert_eq!(arena.committed(), ARENA_SIZE);
    assert_eq!(heap.tag_of(ptr), Tag::used(MAX_ALLOCATION_SIZE + OVERHEAD));

    unsafe {
      assert!(is_filled(ptr, MAX_ALLOCATION_SIZE, 0));
      fill(ptr, MAX_ALLOCATION_SIZE, 0x5A);
    }
    heap.check();
  }

  #[test]
  fn test_word_aligned_and_writable() {
    let mut heap = Heap::new();

    for size in 1..=200 {
      let ptr = heap.allocate(size);
      assert!(!ptr.is_null());
      assert_eq!(ptr as usize % WORD, 0);
      assert!(heap.tag_of(ptr).payload_size() >= size);

      unsafe {
        assert!(is_filled(ptr, size, 0));
        fill(ptr, size, size as u8);
      }
    }

    heap.check();
  }

  #[test]
  fn test_one_word_request_gets_room_for_links() {
    let mut heap = Heap::new();
    let ptr = heap.allocate(1);
    assert_eq!(heap.tag_of(ptr), Tag::used(MIN_BLOCK_SIZE));
  }

  #[test]
  fn test_split_hands_out_upper_part() {
    let mut heap = Heap::new();
    let a = heap.allocate(64);
    let b = heap.allocate(64);

    // Carved from the top of the single free block, so later blocks sit lower.
    assert!(b < a);
    assert_eq!(a as usize - b as usize, 64 + OVERHEAD);

    let arena = heap.arena.as_ref().unwrap();
    let free = heap.lists.head(SizeClass::Other).unwrap();
    assert_eq!(arena.next_block(free), arena.block_of(NonNull::new(b).unwrap()));
    heap.check();
  }

  #[test]
  fn test_bucket_hit_is_reused() {
    let mut heap = Heap::new();
    let a = heap.allocate(48);
    let _guard = heap.allocate(8);
    let b = heap.allocate(48);
    let _guard = heap.allocate(8);

    unsafe {
      fill(a, 48, 0xAA);
      heap.release(a);
    }

    let class = SizeClass::of(48);
    assert!(heap.lists.head(class).is_some());

    let c = heap.allocate(48);
    assert_eq!(c, a);
    assert!(heap.lists.head(class).is_none());
    unsafe { assert!(is_filled(c, 48, 0)) };

    assert_ne!(c, b);
    heap.check();
  }

  #[test]
  fn test_larger_bucket_serves_smaller_request() {
    let mut heap = Heap::new();
    let a = heap.allocate(64);
    let _guard = heap.allocate(8);

    unsafe { heap.release(a) };

    // 64 - 16 leaves a 16 byte remainder, too small to split off.
    let b = heap.allocate(48);
    assert_eq!(b, a);
    assert_eq!(heap.tag_of(b), Tag::used(64 + OVERHEAD));
    heap.check();

    unsafe { heap.release(b) };
    heap.check();

    // 64 - 24 = 40 leaves a remainder big enough to stand alone.
    let c = heap.allocate(24);
    assert_eq!(heap.tag_of(c), Tag::used(24 + OVERHEAD));
    assert!(heap.lists.head(SizeClass::of(64 - 24 - OVERHEAD)).is_some());
    heap.check();
  }

  #[test]
  fn test_catch_all_accepts_exact_or_splittable_only() {
    let mut heap = Heap::new();
    let big = (BUCKET_COUNT + 4) * WORD;

    let a = heap.allocate(big);
    let _guard = heap.allocate(8);
    let _filler = heap.allocate(MAX_ALLOCATION_SIZE / 2);

    unsafe { heap.release(a) };
    let arena = heap.arena.as_ref().unwrap();
    let listed = heap.lists.head(SizeClass::Other).unwrap();
    assert_eq!(arena.payload_ptr(listed).as_ptr(), a);

    // Exact size takes the freed block at the head of the list.
    let b = heap.allocate(big);
    assert_eq!(b, a);
    heap.check();

    unsafe { heap.release(b) };

    // One word less is neither exact nor splittable, so the large block
    // behind it serves the request instead.
    let c = heap.allocate(big - WORD);
    assert_ne!(c, a);
    assert!(!heap.tag_of(a).allocated);
    heap.check();
  }

  #[test]
  fn test_extension_after_exhaustion() {
    let mut heap = Heap::new();
    let first = heap.allocate(MAX_ALLOCATION_SIZE);
    assert!(!first.is_null());

    let second = heap.allocate(128);
    assert!(!second.is_null());

    let arena = heap.arena.as_ref().unwrap();
    assert_eq!(arena.committed(), 2 * ARENA_SIZE);
    assert!(second as usize > first as usize + MAX_ALLOCATION_SIZE);

    unsafe {
      assert!(is_filled(second, 128, 0));
      fill(second, 128, 0x11);
      fill(first, MAX_ALLOCATION_SIZE, 0x22);
      assert!(is_filled(second, 128, 0x11));
    }

    // The rest of the extension is reusable.
    let third = heap.allocate(4096);
    let arena = heap.arena.as_ref().unwrap();
    assert_eq!(arena.committed(), 2 * ARENA_SIZE);
    unsafe { fill(third, 4096, 0x33) };
    heap.check();

    unsafe {
      heap.release(first);
      heap.release(second);
      heap.release(third);
    }
    heap.check();
  }

  #[test]
  fn test_repeated_extension() {
    let mut heap = Heap::new();
    let mut ptrs = Vec::new();

    for _ in 0..4 {
      let ptr = heap.allocate(MAX_ALLOCATION_SIZE);
      assert!(!ptr.is_null());
      ptrs.push(ptr);
    }

    let arena = heap.arena.as_ref().unwrap();
    assert_eq!(arena.committed(), 4 * ARENA_SIZE);

    for ptr in ptrs {
      unsafe { heap.release(ptr) };
    }
    heap.check();

    // Everything coalesced back into one free span.
    let arena = heap.arena.as_ref().unwrap();
    let span = heap.lists.head(SizeClass::Other).unwrap();
    assert_eq!(arena.next_free(span), None);
    assert_eq!(arena.next_block(span), arena.end_fence());
  }

  #[cfg(target_pointer_width = "64")]
  #[test]
  fn test_growth_beyond_a_gigabyte() {
    let mut heap = Heap::new();
    let arenas = (1 << 30) / ARENA_SIZE + 2;

    for i in 0..arenas {
      let ptr = heap.try_allocate(MAX_ALLOCATION_SIZE);
      assert!(matches!(ptr, Ok(Some(_))), "arena {i}: {ptr:?}");
    }
    assert!(matches!(heap.try_allocate(64), Ok(Some(_))));

    let arena = heap.arena.as_ref().unwrap();
    assert_eq!(arena.committed(), (arenas + 1) * ARENA_SIZE);
    heap.check();
  }

  #[test]
  fn test_catch_all_scan_is_bounded() {
    let mut heap = Heap::new();
    let small = (BUCKET_COUNT + 4) * WORD;
    let mut holes = Vec::new();

    for _ in 0..CATCH_ALL_SCAN_LIMIT + 10 {
      holes.push(heap.allocate(small));
      let _guard = heap.allocate(8);
    }
    // Keep the large remainder at the back of the catch-all list.
    for hole in holes {
      unsafe { heap.release(hole) };
    }
    heap.check();

    let committed = heap.arena.as_ref().unwrap().committed();
    heap.allocate(small + 4 * WORD);
    assert_eq!(heap.arena.as_ref().unwrap().committed(), committed + ARENA_SIZE);
    heap.check();
  }

  proptest! {
    #[test]
    fn prop_live_allocations_are_disjoint_and_intact(
      ops in prop::collection::vec((1usize..2048, any::<bool>()), 1..120),
    ) {
      let mut heap = Heap::new();
      let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

      for (i, (size, release)) in ops.into_iter().enumerate() {
        if release && !live.is_empty() {
          let (ptr, len, byte) = live.swap_remove(i % live.len());
          unsafe {
            prop_assert!(is_filled(ptr, len, byte));
            heap.release(ptr);
          }
        } else {
          let ptr = heap.allocate(size);
          prop_assert!(!ptr.is_null());
          let byte = (i % 251) as u8 + 1;
          unsafe {
            prop_assert!(is_filled(ptr, size, 0));
            fill(ptr, size, byte);
          }
          live.push((ptr, size, byte));
        }

        heap.check();
      }

      let mut ranges: Vec<_> = live.iter().map(|&(p, len, _)| (p as usize, p as usize + len)).collect();
      ranges.sort();
      for pair in ranges.windows(2) {
        prop_assert!(pair[0].1 <= pair[1].0);
      }

      for (ptr, len, byte) in live {
        unsafe { prop_assert!(is_filled(ptr, len, byte)) };
      }
    }
  }
}
