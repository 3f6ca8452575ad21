use crate::error::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Resolve one level of symbolic link, falling back to the given path.
///
/// A relative link target is interpreted relative to the link's parent
/// directory. Resolving ensures a file reached through several differently
/// named links is cached only once.
pub(crate) fn resolve_symlink(path: &Path) -> PathBuf {
    match fs::read_link(path) {
        Ok(target) => {
            if target.is_absolute() {
                target
            } else {
                match path.parent() {
                    Some(parent) => parent.join(target),
                    None => target,
                }
            }
        }
        // Not a symlink, or unreadable; either way the original path stands.
        Err(_) => path.to_path_buf(),
    }
}

/// Copy `source` over `destination`, removing any existing destination first.
pub(crate) fn copy_overwrite(source: &Path, destination: &Path) -> Result<()> {
    match fs::remove_file(destination) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    fs::copy(source, destination)?;
    Ok(())
}

/// Last access time of a file, for LRU ordering.
///
/// Filesystems without access-time support report the epoch, which makes the
/// file the oldest candidate rather than an error.
pub(crate) fn access_time(metadata: &fs::Metadata) -> SystemTime {
    metadata.accessed().unwrap_or(UNIX_EPOCH)
}
