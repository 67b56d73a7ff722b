//! Address space acquisition through `mmap(2)`.

use std::{io, ptr::NonNull};

use libc::c_void;
use tracing::warn;

use crate::error::AllocError;

// Older kernels ignore the flag and treat the address as a hint, which the
// address check in `map_at` still catches.
#[cfg(target_os = "linux")]
const MAP_NO_CLOBBER: libc::c_int = libc::MAP_FIXED_NOREPLACE;
#[cfg(not(target_os = "linux"))]
const MAP_NO_CLOBBER: libc::c_int = 0;

fn last_errno() -> i32 {
  io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Reserves `len` bytes of address space without access rights or swap.
pub fn reserve(len: usize) -> Result<NonNull<u8>, AllocError> {
  let addr = unsafe {
    libc::mmap(
      std::ptr::null_mut(),
      len,
      libc::PROT_NONE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
      -1,
      0,
    )
  };

  if addr == libc::MAP_FAILED {
    return Err(AllocError::MapFailed {
      len,
      errno: last_errno(),
    });
  }

  NonNull::new(addr as *mut u8).ok_or(AllocError::MapFailed { len, errno: 0 })
}

/// Maps `len` zero-filled read-write bytes exactly at `addr`.
///
/// # Safety
///
/// `[addr, addr + len)` must lie inside a range obtained from [`reserve`]
/// that is not yet mapped read-write; `MAP_FIXED` silently replaces whatever
/// is there.
pub unsafe fn commit(
  addr: NonNull<u8>,
  len: usize,
) -> Result<(), AllocError> {
  let mapped = unsafe {
    libc::mmap(
      addr.as_ptr() as *mut c_void,
      len,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
      -1,
      0,
    )
  };

  if mapped == libc::MAP_FAILED {
    return Err(AllocError::MapFailed {
      len,
      errno: last_errno(),
    });
  }

  debug_assert_eq!(mapped as *mut u8, addr.as_ptr());
  Ok(())
}

/// Maps `len` zero-filled read-write bytes at `addr`, outside any
/// reservation. Never moves or replaces an existing mapping: if the range is
/// taken the call fails with `EEXIST`.
pub fn map_at(
  addr: NonNull<u8>,
  len: usize,
) -> Result<(), AllocError> {
  let mapped = unsafe {
    libc::mmap(
      addr.as_ptr() as *mut c_void,
      len,
      libc::PROT_READ | libc::PROT_WRITE,
      libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | MAP_NO_CLOBBER,
      -1,
      0,
    )
  };

  if mapped == libc::MAP_FAILED {
    return Err(AllocError::MapFailed {
      len,
      errno: last_errno(),
    });
  }

  if mapped as *mut u8 != addr.as_ptr() {
    unsafe { libc::munmap(mapped, len) };
    return Err(AllocError::MapFailed {
      len,
      errno: libc::EEXIST,
    });
  }

  Ok(())
}

/// Returns a reservation to the OS.
///
/// # Safety
///
/// Nothing may reference the range afterwards.
pub unsafe fn release(
  addr: NonNull<u8>,
  len: usize,
) {
  let rc = unsafe { libc::munmap(addr.as_ptr() as *mut c_void, len) };

  if rc != 0 {
    warn!(addr = ?addr, len, errno = last_errno(), "munmap failed");
  }
}

/// Flags the calling thread's `errno` as `ENOMEM`, as `malloc(3)` does.
///
/// Only Linux, Android, macOS, iOS and FreeBSD expose `errno` through
/// `libc`; elsewhere callers only see the null pointer.
pub fn set_enomem() {
  #[cfg(any(target_os = "linux", target_os = "android"))]
  unsafe {
    *libc::__errno_location() = libc::ENOMEM;
  }
  #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
  unsafe {
    *libc::__error() = libc::ENOMEM;
  }
  #[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
  )))]
  {}
}
