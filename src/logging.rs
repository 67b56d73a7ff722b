//! Log output for the allocator.
//!
//! The allocator only emits `tracing` events: `debug` when arenas are mapped
//! or grown, `trace` per allocation and release, `warn` on failed requests.
//! Nothing is printed until the embedding program installs a subscriber,
//! for instance through [`init_logging`].

/// Installs a compact stderr subscriber filtered by `RUST_LOG`, defaulting
/// to `tagalloc=debug` in debug builds and `tagalloc=info` otherwise.
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
  use tracing_subscriber::{EnvFilter, fmt};

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    if cfg!(debug_assertions) {
      EnvFilter::new("tagalloc=debug")
    } else {
      EnvFilter::new("tagalloc=info")
    }
  });

  fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .compact()
    .try_init()
    .ok();
}
