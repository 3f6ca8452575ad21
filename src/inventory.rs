//! Process-global registry of cache locations, holder processes and holds.
//!
//! The registry is a three-level tree:
//!
//! ```text
//! cache location -> process id -> instance id -> set of held cache files
//! ```
//!
//! plus the set of live instance ids per process and the shared byte budget
//! per location. A held file is never evicted by tidy-up and never
//! overwritten by a refresh; that guarantee is exactly as strong as this
//! registry, so every mutation happens under its single readers-writer lock.
//!
//! One registry exists per running image (see [`SharedInventory::global`]).
//! Instances receive a handle at construction, which also lets tests operate
//! on a hermetic registry instead of the process-wide one.

use crate::process::{KillProbe, LivenessProbe};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

type InstanceHoldings = HashMap<u64, HashSet<PathBuf>>;
type ProcessHoldings = HashMap<u32, InstanceHoldings>;

#[derive(Default)]
struct Maps {
    /// location -> process -> instance -> held cache files.
    inventory: HashMap<PathBuf, ProcessHoldings>,
    /// Live instance ids per process.
    instances: HashMap<u32, HashSet<u64>>,
    /// Byte budget per location; absent or 0 means unlimited.
    budgets: HashMap<PathBuf, u64>,
}

static GLOBAL: Lazy<Arc<SharedInventory>> = Lazy::new(|| Arc::new(SharedInventory::new()));

/// The shared inventory described in the module docs.
pub struct SharedInventory {
    maps: RwLock<Maps>,
    /// Serializes whole engine operations, not just map access: an eviction
    /// decision and the file removal it justifies must not interleave with a
    /// concurrent hold registration in this process.
    op_lock: Mutex<()>,
    liveness: Box<dyn LivenessProbe>,
    next_id: AtomicU64,
}

impl SharedInventory {
    /// The registry shared by every cache instance in this process image.
    pub fn global() -> Arc<SharedInventory> {
        Arc::clone(&GLOBAL)
    }

    /// A fresh registry probing liveness via `kill(pid, 0)`.
    pub fn new() -> Self {
        Self::with_liveness(Box::new(KillProbe))
    }

    /// A fresh registry with a caller-supplied liveness probe.
    pub fn with_liveness(liveness: Box<dyn LivenessProbe>) -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
            op_lock: Mutex::new(()),
            liveness,
            next_id: AtomicU64::new(1),
        }
    }

    /// Hold this guard for the duration of one engine operation.
    pub(crate) fn op_guard(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Register a new instance of `pid` at `location` and return its id.
    ///
    /// Ids are non-zero and never reused while the owning instance is alive;
    /// the draw is retried against the process's live set.
    pub fn register_instance(&self, location: &Path, pid: u32) -> u64 {
        let mut guard = self.write();
        let maps = &mut *guard;

        let live = maps.instances.entry(pid).or_default();
        let id = loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
            if candidate != 0 && !live.contains(&candidate) {
                break candidate;
            }
        };
        live.insert(id);

        maps.inventory
            .entry(location.to_path_buf())
            .or_default()
            .entry(pid)
            .or_default()
            .insert(id, HashSet::new());

        id
    }

    /// Move a live instance from `old` to `new`, keeping its id.
    ///
    /// The holds recorded at the old location are dropped; the instance
    /// starts empty at the new one.
    pub fn relocate_instance(&self, old: &Path, new: &Path, pid: u32, id: u64) {
        let mut guard = self.write();
        let maps = &mut *guard;

        remove_instance_holdings(&mut maps.inventory, old, pid, id);
        maps.instances.entry(pid).or_default().insert(id);
        maps.inventory
            .entry(new.to_path_buf())
            .or_default()
            .entry(pid)
            .or_default()
            .insert(id, HashSet::new());
    }

    /// Remove an instance and everything it holds, pruning empty parents.
    pub fn unregister_instance(&self, location: &Path, pid: u32, id: u64) {
        let mut guard = self.write();
        let maps = &mut *guard;

        if let Some(live) = maps.instances.get_mut(&pid) {
            live.remove(&id);
            if live.is_empty() {
                maps.instances.remove(&pid);
            }
        }

        remove_instance_holdings(&mut maps.inventory, location, pid, id);
    }

    /// Record that instance `id` uses `cached`.
    pub fn add_hold(&self, location: &Path, pid: u32, id: u64, cached: &Path) {
        let mut guard = self.write();
        guard
            .inventory
            .entry(location.to_path_buf())
            .or_default()
            .entry(pid)
            .or_default()
            .entry(id)
            .or_default()
            .insert(cached.to_path_buf());
    }

    /// Drop instance `id`'s claim on `cached`; no-op when it has none.
    pub fn remove_hold(&self, location: &Path, pid: u32, id: u64, cached: &Path) {
        let mut guard = self.write();
        if let Some(held) = guard
            .inventory
            .get_mut(location)
            .and_then(|processes| processes.get_mut(&pid))
            .and_then(|instances| instances.get_mut(&id))
        {
            held.remove(cached);
        }
    }

    /// Whether any holder at `location` claims `cached`.
    pub fn is_held_anywhere(&self, location: &Path, cached: &Path) -> bool {
        let guard = self.read();
        guard
            .inventory
            .get(location)
            .map(|processes| {
                processes.values().any(|instances| {
                    instances.values().any(|held| held.contains(cached))
                })
            })
            .unwrap_or(false)
    }

    /// Whether the specific instance `id` of `pid` claims `cached`.
    pub fn is_held_by(&self, location: &Path, pid: u32, id: u64, cached: &Path) -> bool {
        let guard = self.read();
        guard
            .inventory
            .get(location)
            .and_then(|processes| processes.get(&pid))
            .and_then(|instances| instances.get(&id))
            .map(|held| held.contains(cached))
            .unwrap_or(false)
    }

    /// Drop the holdings of every process at `location` that no longer runs.
    ///
    /// Holders can disappear without a clean teardown (killed renders,
    /// crashed batch jobs); reaping them is what eventually frees their files
    /// for eviction.
    pub fn reap_dead_processes(&self, location: &Path, self_pid: u32) {
        let mut guard = self.write();
        let Some(processes) = guard.inventory.get_mut(location) else {
            return;
        };

        processes.retain(|&pid, _| pid == self_pid || self.liveness.is_alive(pid));
        if processes.is_empty() {
            guard.inventory.remove(location);
        }
    }

    /// The byte budget for `location`; 0 means unlimited.
    pub fn budget(&self, location: &Path) -> u64 {
        self.read().budgets.get(location).copied().unwrap_or(0)
    }

    /// Set the byte budget for `location`, visible to every instance there.
    pub fn set_budget(&self, location: &Path, bytes: u64) {
        self.write().budgets.insert(location.to_path_buf(), bytes);
    }

    /// Number of locations with at least one recorded holder.
    pub fn location_count(&self) -> usize {
        self.read().inventory.len()
    }

    /// Number of live instances registered by `pid`.
    pub fn instance_count(&self, pid: u32) -> usize {
        self.read()
            .instances
            .get(&pid)
            .map(|live| live.len())
            .unwrap_or(0)
    }

    fn read(&self) -> RwLockReadGuard<'_, Maps> {
        self.maps.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Maps> {
        self.maps.write().unwrap_or_else(|err| err.into_inner())
    }
}

impl Default for SharedInventory {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove one instance's holdings entry and prune empty parents.
fn remove_instance_holdings(
    inventory: &mut HashMap<PathBuf, ProcessHoldings>,
    location: &Path,
    pid: u32,
    id: u64,
) {
    let Some(processes) = inventory.get_mut(location) else {
        return;
    };
    if let Some(instances) = processes.get_mut(&pid) {
        instances.remove(&id);
        if instances.is_empty() {
            processes.remove(&pid);
        }
    }
    if processes.is_empty() {
        inventory.remove(location);
    }
}
