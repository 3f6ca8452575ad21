//! Bijective mapping between original absolute paths and cache file names.
//!
//! A cached file's name is the absolute original path with every `/` replaced
//! by `%`, so the cache directory stays flat and files with equal base names
//! in different directories never collide. Splitting the name on `%` restores
//! the original path, which is how write-back finds its destination without
//! any on-disk index.

use crate::error::{CacheError, Result};
use std::path::{Path, PathBuf};

/// Stands in for `/` inside cache file names.
pub const SEPARATOR_SENTINEL: char = '%';

/// Derive the cache-directory file for `original`.
///
/// Relative inputs are anchored at `cwd`, the working directory the owning
/// cache instance captured at construction time. Inputs whose textual form
/// already contains [`SEPARATOR_SENTINEL`], or that are not valid UTF-8, are
/// rejected: the mangling would no longer be reversible.
pub fn to_cached(cache_dir: &Path, cwd: &Path, original: &Path) -> Result<PathBuf> {
    let absolute = if original.has_root() {
        original.to_path_buf()
    } else {
        cwd.join(original)
    };

    let text = absolute
        .to_str()
        .ok_or_else(|| CacheError::UnmappablePath {
            path: original.to_path_buf(),
        })?;
    if text.contains(SEPARATOR_SENTINEL) {
        return Err(CacheError::UnmappablePath {
            path: original.to_path_buf(),
        });
    }

    let mangled = text.replace('/', "%");
    Ok(cache_dir.join(mangled))
}

/// Recover the original path from a cache file.
///
/// Only the file-name component matters; any leading directory is ignored.
pub fn to_original(cached: &Path) -> Result<PathBuf> {
    let name = cached
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| CacheError::UnmappablePath {
            path: cached.to_path_buf(),
        })?;

    Ok(PathBuf::from(name.replace(SEPARATOR_SENTINEL, "/")))
}
