//! Classification of paths as remote (network filesystem) or local.
//!
//! Only remote files are worth mirroring; a local original is always returned
//! unchanged. Classification stats the *containing directory* of the probed
//! path, so it works for files that do not exist yet (write caching).

use crate::util::resolve_symlink;
use std::path::Path;

/// Decides whether a path lives on networked storage.
///
/// This is a seam: production code uses [`StatfsProbe`], tests substitute a
/// probe that treats a scratch directory as remote.
pub trait RemoteProbe: Send + Sync {
    fn is_remote(&self, path: &Path) -> bool;
}

/// Filesystem-type magic numbers of network filesystems, per `statfs(2)`.
///
/// Widen this set to teach the cache about additional network filesystems.
#[cfg(target_os = "linux")]
const NETWORK_FS_MAGICS: &[u32] = &[
    0x6969,      // NFS_SUPER_MAGIC
    0x517B,      // SMB_SUPER_MAGIC
    0xFE53_4D42, // SMB2_SUPER_MAGIC
    0xFF53_4D42, // CIFS_SUPER_MAGIC
];

/// Default classifier backed by `statfs(2)`.
///
/// The filesystem *type* code is consulted, not the filesystem id: the two
/// are distinct OS concepts, and only `f_type` carries the superblock magic
/// the network-filesystem markers are defined for.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatfsProbe;

impl RemoteProbe for StatfsProbe {
    fn is_remote(&self, path: &Path) -> bool {
        let resolved = resolve_symlink(path);
        // Stat the directory that holds the file; the file itself may not
        // exist yet.
        let Some(dir) = resolved.parent() else {
            return false;
        };

        match filesystem_type(dir) {
            Some(magic) => NETWORK_FS_MAGICS.contains(&magic),
            // Probe failure means "local": a wrong local answer merely skips
            // caching for this path, a wrong remote answer would cache files
            // that gain nothing from it.
            None => false,
        }
    }
}

#[cfg(target_os = "linux")]
fn filesystem_type(dir: &Path) -> Option<u32> {
    use std::os::unix::ffi::OsStrExt;

    let dir = std::ffi::CString::new(dir.as_os_str().as_bytes()).ok()?;
    let mut stats: libc::statfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statfs(dir.as_ptr(), &mut stats) };
    if rc != 0 {
        return None;
    }

    // `f_type` is a signed word whose width varies by target; the magic
    // constants all fit in 32 bits.
    Some(stats.f_type as u32)
}

#[cfg(not(target_os = "linux"))]
fn filesystem_type(_dir: &Path) -> Option<u32> {
    // No statfs magic available; every path classifies as local, which
    // disables caching rather than risking misbehavior.
    None
}
