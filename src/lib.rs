//! Multi-location, multi-process, thread-safe file cache.
//!
//! Mirrors files that live on remote (network) storage into a local
//! directory so consumers read them at local-disk speed. The building
//! blocks:
//! - a flat, index-free on-disk layout (the `%`-mangled original path *is*
//!   the cache file name)
//! - a process-global inventory of who holds which cached file, so a file in
//!   use is never refreshed or evicted underneath its users
//! - LRU tidy-up under a shared per-location byte budget
//! - liveness-based reclamation of holds left behind by dead processes
//!
//! Every public operation degrades to the original path on failure; using
//! the cache is never worse than not using it.

mod cache;
mod error;
mod freshness;
mod inventory;
mod path_map;
mod process;
mod remote;
mod tidy;
mod util;

pub use cache::{CacheOptions, FileCache, DEFAULT_LOCATION, LOCATION_ENV, SIZE_ENV};
pub use error::{CacheError, Result};
pub use freshness::is_different;
pub use inventory::SharedInventory;
pub use path_map::{to_cached, to_original, SEPARATOR_SENTINEL};
pub use process::{KillProbe, LivenessProbe};
pub use remote::{RemoteProbe, StatfsProbe};
pub use tidy::ensure_room;
