use std::{io::Read, ptr};

use tagalloc::{Heap, MAX_ALLOCATION_SIZE, config::OVERHEAD, logging};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the mappings with `pmap` or
/// `/proc/<pid>/maps` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_alloc(
  label: &str,
  size: usize,
  addr: *mut u8,
) {
  println!("[{label}] allocated {size} bytes at {addr:?} (PID = {})", std::process::id());
}

fn main() {
  // RUST_LOG=tagalloc=trace shows every allocation and merge.
  logging::init_logging();

  let mut heap = Heap::new();

  unsafe {
    // --------------------------------------------------------------------
    // 1) First request maps the arena and splits the single free block.
    // --------------------------------------------------------------------
    let first = heap.allocate(4);
    print_alloc("1", 4, first);
    (first as *mut u32).write(0xDEADBEEF);
    println!("[1] value = 0x{:X}", (first as *mut u32).read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Three neighbors, carved downwards from the top of the arena.
    // --------------------------------------------------------------------
    let a = heap.allocate(64);
    let b = heap.allocate(64);
    let c = heap.allocate(64);
    print_alloc("2a", 64, a);
    print_alloc("2b", 64, b);
    print_alloc("2c", 64, c);
    ptr::write_bytes(a, 0xAA, 64);
    ptr::write_bytes(b, 0xBB, 64);
    ptr::write_bytes(c, 0xCC, 64);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Release the outer two, then the middle one: all three merge.
    // --------------------------------------------------------------------
    heap.release(a);
    heap.release(c);
    heap.release(b);
    println!("\n[3] released a, c, b");

    let merged = heap.allocate(3 * 64 + 2 * OVERHEAD);
    print_alloc("3", 3 * 64 + 2 * OVERHEAD, merged);
    println!(
      "[3] merged == c? {} (first byte = {})",
      if merged == c { "Yes, the three blocks were coalesced" } else { "No" },
      *merged
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Something that cannot fit any more forces an extension.
    // --------------------------------------------------------------------
    let big = heap.allocate(MAX_ALLOCATION_SIZE);
    print_alloc("4", MAX_ALLOCATION_SIZE, big);
    ptr::write_bytes(big, 0x11, MAX_ALLOCATION_SIZE);

    let oversized = heap.allocate(MAX_ALLOCATION_SIZE + 1);
    println!("[4] oversized request -> {:?} ({})", oversized, std::io::Error::last_os_error());

    block_until_enter_pressed();

    heap.release(big);
    heap.release(merged);
    heap.release(first);

    println!("\n[5] End of example. Dropping the heap unmaps its arena.");
  }
}
