//! Freshness test between an original file and its cached copy.

use crate::error::Result;
use std::fs;
use std::path::Path;

/// Whether the cached copy no longer matches the original.
///
/// A cached file counts as different when its modification time is strictly
/// older than the original's, or when the sizes disagree. Content is never
/// inspected. Stat failures propagate; the engine degrades to the original
/// path rather than guessing.
pub fn is_different(original: &Path, cached: &Path) -> Result<bool> {
    let original_meta = fs::metadata(original)?;
    let cached_meta = fs::metadata(cached)?;

    Ok(cached_meta.modified()? < original_meta.modified()?
        || original_meta.len() != cached_meta.len())
}
