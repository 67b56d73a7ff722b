use std::{error, fmt};

/// Why a request could not be served.
///
/// A zero-sized request is not an error; it yields no allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// The request exceeds the largest size a single arena can hold.
  OutOfRange { requested: usize, max: usize },
  /// The OS refused to map memory, or the range after the arena is taken
  /// (`errno` is then `EEXIST`).
  MapFailed { len: usize, errno: i32 },
}

impl fmt::Display for AllocError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::OutOfRange { requested, max } => {
        write!(f, "request of {requested} bytes exceeds maximum allocation of {max} bytes")
      }
      Self::MapFailed { len, errno } => {
        write!(f, "mapping {len} bytes failed (errno {errno})")
      }
    }
  }
}

impl error::Error for AllocError {}
