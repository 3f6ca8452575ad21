//! Process liveness probing for stale-holder reclamation.

/// Decides whether a recorded holder process still exists.
///
/// This is a seam: production code uses [`KillProbe`], tests substitute a
/// probe with a scripted set of dead pids.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Default probe using `kill(pid, 0)`.
///
/// The null signal performs permission and existence checks without
/// delivering anything, and never blocks. `ESRCH` is the only outcome that
/// proves the process is gone; `EPERM` in particular means the process
/// exists but belongs to someone else.
#[derive(Debug, Default, Clone, Copy)]
pub struct KillProbe;

impl LivenessProbe for KillProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        if pid == std::process::id() {
            return true;
        }

        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if rc == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        // Without a cheap existence probe, assume alive; the cost is unreaped
        // holders, never an evicted file somebody still uses.
        true
    }
}
