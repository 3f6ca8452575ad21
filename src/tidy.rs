//! Quota enforcement: make room for an incoming file by evicting the
//! least-recently-accessed unheld cache entries.

use crate::error::Result;
use crate::inventory::SharedInventory;
use crate::util::access_time;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

struct Candidate {
    accessed: SystemTime,
    path: PathBuf,
    size: u64,
}

/// Ensure `incoming_bytes` fit under `location`'s budget, evicting if needed.
///
/// Returns `Ok(false)` when the budget cannot be met even after evicting
/// every unheld file; the caller must then refuse to populate the cache.
/// Eviction is ordered by access time, oldest first: the quota approximates
/// LRU, freshness is a separate concern. Held files are always skipped.
pub fn ensure_room(
    inventory: &SharedInventory,
    location: &Path,
    incoming_bytes: u64,
) -> Result<bool> {
    let budget = inventory.budget(location);
    if budget == 0 {
        return Ok(true);
    }

    let mut candidates = Vec::new();
    let mut total = incoming_bytes;

    for entry in fs::read_dir(location)? {
        let entry = entry?;
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            // Entries can race with deletion by another process sharing the
            // location; a vanished entry is simply not a candidate.
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };
        if !file_type.is_file() {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        };

        total = total.saturating_add(metadata.len());
        candidates.push(Candidate {
            accessed: access_time(&metadata),
            path: entry.path(),
            size: metadata.len(),
        });
    }

    // Holders that died without a teardown must not pin their files forever.
    inventory.reap_dead_processes(location, std::process::id());

    if total <= budget {
        return Ok(true);
    }

    // Stable sort: files with equal access times keep enumeration order.
    candidates.sort_by_key(|candidate| candidate.accessed);

    for candidate in &candidates {
        if inventory.is_held_anywhere(location, &candidate.path) {
            continue;
        }

        match fs::remove_file(&candidate.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        tracing::debug!(
            target = "filecache",
            path = %candidate.path.display(),
            size = candidate.size,
            "evicted cache file"
        );

        total = total.saturating_sub(candidate.size);
        if total < budget {
            return Ok(true);
        }
    }

    Ok(false)
}
