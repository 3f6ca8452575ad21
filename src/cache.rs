//! The cache engine: public operations, instance lifecycle and the fallback
//! discipline that turns every internal failure into "use the original path".

use crate::error::{CacheError, Result};
use crate::freshness;
use crate::inventory::SharedInventory;
use crate::path_map;
use crate::remote::{RemoteProbe, StatfsProbe};
use crate::tidy;
use crate::util;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Cache directory used when neither the constructor nor the environment
/// names one.
pub const DEFAULT_LOCATION: &str = "/var/tmp/_cache";

/// Environment variable naming the cache directory.
pub const LOCATION_ENV: &str = "FILECACHE_LOCATION";

/// Environment variable with the byte budget for the resolved location.
/// Bytes, not megabytes; 0 means unlimited. Note that [`FileCache::resize`]
/// speaks megabytes.
pub const SIZE_ENV: &str = "FILECACHE_SIZE";

/// Construction options for a [`FileCache`].
///
/// The defaults give production behavior: location from the environment,
/// `statfs`-based remote classification, and the process-wide shared
/// inventory. Tests substitute the probe and the inventory to run
/// hermetically.
pub struct CacheOptions {
    /// Cache directory; empty means "resolve from the environment".
    pub location: PathBuf,
    /// Master switch; `false` makes every operation return its input.
    pub activate: bool,
    /// Classifier deciding which originals live on networked storage.
    pub remote_probe: Arc<dyn RemoteProbe>,
    /// The registry this instance records its holds in.
    pub inventory: Arc<SharedInventory>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            location: PathBuf::new(),
            activate: true,
            remote_probe: Arc::new(StatfsProbe),
            inventory: SharedInventory::global(),
        }
    }
}

struct InstanceState {
    location: PathBuf,
    active: bool,
    verbose: bool,
}

/// A local mirror for files residing on remote storage.
///
/// Instances are cheap; several may share one cache location, within a
/// process and across processes. All of them record their holds in the
/// shared inventory, which is what keeps a file in use by one holder safe
/// from refreshes and eviction triggered by another.
///
/// Every operation degrades to the original path on failure; the cache never
/// raises an error to its caller and never panics on filesystem trouble.
pub struct FileCache {
    inventory: Arc<SharedInventory>,
    remote: Arc<dyn RemoteProbe>,
    id: u64,
    cwd: PathBuf,
    process_name: Option<String>,
    state: RwLock<InstanceState>,
}

impl FileCache {
    /// Create an instance at `location`, or at the environment-resolved
    /// location when `location` is empty (see [`LOCATION_ENV`] and
    /// [`DEFAULT_LOCATION`]).
    ///
    /// `activate = false` turns the cache off altogether: every request
    /// returns the original path. The cache also deactivates itself when the
    /// resolved directory cannot be created, or when it turns out to live on
    /// remote storage (mirroring remote to remote gains nothing).
    pub fn new(location: impl AsRef<Path>, activate: bool) -> Self {
        Self::with_options(CacheOptions {
            location: location.as_ref().to_path_buf(),
            activate,
            ..CacheOptions::default()
        })
    }

    /// Create an instance from explicit [`CacheOptions`].
    pub fn with_options(options: CacheOptions) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let process_name = process_name();
        let mut warnings = Vec::new();

        let (mut location, from_env) = resolve_location(&options.location);
        let mut active = options.activate;

        match ensure_location_dir(&location) {
            Ok(()) => {}
            Err(err) if from_env => {
                warnings.push(format!(
                    "could not create cache location '{}' ({err}); using '{DEFAULT_LOCATION}'",
                    location.display()
                ));
                location = PathBuf::from(DEFAULT_LOCATION);
                if let Err(err) = ensure_location_dir(&location) {
                    warnings.push(format!(
                        "could not create cache location '{}': {err}",
                        location.display()
                    ));
                    active = false;
                }
            }
            Err(err) => {
                warnings.push(format!(
                    "could not create cache location '{}': {err}",
                    location.display()
                ));
                active = false;
            }
        }

        if active && options.remote_probe.is_remote(&location) {
            tracing::debug!(
                target = "filecache",
                location = %location.display(),
                "cache location is on remote storage; deactivating"
            );
            active = false;
        }

        if let Ok(raw) = std::env::var(SIZE_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(bytes) => options.inventory.set_budget(&location, bytes),
                Err(err) => warnings.push(format!("ignoring {SIZE_ENV}={raw:?}: {err}")),
            }
        }

        let id = options
            .inventory
            .register_instance(&location, std::process::id());

        let cache = Self {
            inventory: options.inventory,
            remote: options.remote_probe,
            id,
            cwd,
            process_name,
            state: RwLock::new(InstanceState {
                location,
                active,
                verbose: true,
            }),
        };

        for warning in warnings {
            cache.warn(warning);
        }

        cache
    }

    /// Mirror `original` into the cache and return the path to read from.
    ///
    /// Local files, an inactive cache, and every failure all yield the
    /// original path unchanged; callers never need to special-case the
    /// outcome. A returned cache path is held by this instance until
    /// [`release`](Self::release) or teardown.
    ///
    /// When the cached copy exists but is outdated while some other holder
    /// uses it, the original path is returned: the copy cannot be updated
    /// underneath its users. An instance that itself already holds the copy
    /// keeps getting it, even when outdated; it committed to that version.
    pub fn acquire_read(&self, original: impl AsRef<Path>) -> PathBuf {
        let original = original.as_ref();
        match self.acquire_read_inner(original) {
            Ok(path) => path,
            Err(err) => {
                self.warn(format!(
                    "file '{}' was not cached: {err}",
                    original.display()
                ));
                original.to_path_buf()
            }
        }
    }

    fn acquire_read_inner(&self, original: &Path) -> Result<PathBuf> {
        let _op = self.inventory.op_guard();
        let (active, location) = self.snapshot();
        if !active {
            return Ok(original.to_path_buf());
        }

        let source = util::resolve_symlink(original);
        if !self.remote.is_remote(&source) {
            tracing::debug!(
                target = "filecache",
                path = %source.display(),
                "local file; not cached"
            );
            return Ok(original.to_path_buf());
        }

        let cached = path_map::to_cached(&location, &self.cwd, &source)?;
        let pid = std::process::id();

        if cached.exists() {
            if self.inventory.is_held_anywhere(&location, &cached) {
                if !freshness::is_different(&source, &cached)?
                    || self.inventory.is_held_by(&location, pid, self.id, &cached)
                {
                    self.inventory.add_hold(&location, pid, self.id, &cached);
                    return Ok(cached);
                }

                // Outdated but in use: nobody may refresh it now.
                tracing::debug!(
                    target = "filecache",
                    path = %cached.display(),
                    "cached copy outdated but held elsewhere; using original"
                );
                return Ok(original.to_path_buf());
            }

            if freshness::is_different(&source, &cached)? {
                return self.copy_to_cache(&location, &source, &cached);
            }

            self.inventory.add_hold(&location, pid, self.id, &cached);
            return Ok(cached);
        }

        self.copy_to_cache(&location, &source, &cached)
    }

    /// Hand out a cache slot for writing `original`, without copying data.
    ///
    /// The returned cache path is held by this instance; the caller creates
    /// the file and later moves it to its real destination with
    /// [`write_back`](Self::write_back). A slot whose cached file already
    /// exists and is held by anyone is refused (the original path is
    /// returned): only one holder may ever own a write slot.
    pub fn acquire_write(&self, original: impl AsRef<Path>) -> PathBuf {
        let original = original.as_ref();
        match self.acquire_write_inner(original) {
            Ok(path) => path,
            Err(err) => {
                self.warn(format!(
                    "no cache slot for '{}': {err}",
                    original.display()
                ));
                original.to_path_buf()
            }
        }
    }

    fn acquire_write_inner(&self, original: &Path) -> Result<PathBuf> {
        let _op = self.inventory.op_guard();
        let (active, location) = self.snapshot();
        if !active {
            return Ok(original.to_path_buf());
        }

        let source = util::resolve_symlink(original);
        if !self.remote.is_remote(&source) {
            return Ok(original.to_path_buf());
        }

        let cached = path_map::to_cached(&location, &self.cwd, &source)?;
        if cached.exists() && self.inventory.is_held_anywhere(&location, &cached) {
            tracing::debug!(
                target = "filecache",
                path = %cached.display(),
                "write slot refused; cached file is in use"
            );
            return Ok(original.to_path_buf());
        }

        self.inventory
            .add_hold(&location, std::process::id(), self.id, &cached);
        Ok(cached)
    }

    /// Copy a write-cached file back to its original location, overwriting an
    /// existing destination only when the cached copy is strictly newer.
    ///
    /// Equivalent to [`write_back_with(cached, true, true)`](Self::write_back_with).
    pub fn write_back(&self, cached: impl AsRef<Path>) -> PathBuf {
        self.write_back_with(cached, true, true)
    }

    /// Copy a write-cached file back to its original location.
    ///
    /// `cached` must be held by this instance; otherwise one warning is
    /// logged and `cached` is returned unchanged. A missing destination is
    /// always created. An existing one is replaced only when `overwrite` is
    /// set, and, with `if_newer`, only when its mtime is strictly older than
    /// the cached file's. The hold persists until [`release`](Self::release).
    ///
    /// Returns the destination path on success, `cached` on any failure.
    pub fn write_back_with(
        &self,
        cached: impl AsRef<Path>,
        overwrite: bool,
        if_newer: bool,
    ) -> PathBuf {
        let cached = cached.as_ref();
        match self.write_back_inner(cached, overwrite, if_newer) {
            Ok(path) => path,
            Err(err) => {
                self.warn(format!(
                    "could not copy '{}' back: {err}",
                    cached.display()
                ));
                cached.to_path_buf()
            }
        }
    }

    fn write_back_inner(&self, cached: &Path, overwrite: bool, if_newer: bool) -> Result<PathBuf> {
        let _op = self.inventory.op_guard();
        let (active, location) = self.snapshot();
        if !active {
            return Ok(cached.to_path_buf());
        }

        if !self
            .inventory
            .is_held_by(&location, std::process::id(), self.id, cached)
        {
            return Err(CacheError::NotHeld {
                path: cached.to_path_buf(),
            });
        }

        let destination = path_map::to_original(cached)?;

        if destination.exists() {
            let newer = !if_newer || {
                let destination_mtime = fs::metadata(&destination)?.modified()?;
                let cached_mtime = fs::metadata(cached)?.modified()?;
                destination_mtime < cached_mtime
            };

            if newer && overwrite {
                util::copy_overwrite(cached, &destination)?;
            } else if newer {
                tracing::debug!(
                    target = "filecache",
                    path = %destination.display(),
                    "destination exists and overwriting is disabled; copy skipped"
                );
            } else {
                tracing::debug!(
                    target = "filecache",
                    path = %destination.display(),
                    "destination has the same or a newer timestamp; copy skipped"
                );
            }
        } else {
            util::copy_overwrite(cached, &destination)?;
        }

        Ok(destination)
    }

    /// Give up this instance's claim on `cached`; no-op when it has none.
    ///
    /// A released file becomes a candidate for the next tidy-up.
    pub fn release(&self, cached: impl AsRef<Path>) {
        let _op = self.inventory.op_guard();
        let location = self.read_state().location.clone();
        self.inventory
            .remove_hold(&location, std::process::id(), self.id, cached.as_ref());
    }

    /// Move this instance to a different cache location.
    ///
    /// Holds at the old location are dropped, the instance id is kept, and
    /// relocating to the current location is a no-op. As at construction,
    /// an uncreatable or remote target deactivates the cache.
    pub fn relocate(&self, new_location: impl AsRef<Path>) {
        let new_location = new_location.as_ref();
        let mut warning = None;

        {
            let _op = self.inventory.op_guard();
            let mut state = self.write_state();
            if state.location == new_location {
                return;
            }

            self.inventory.relocate_instance(
                &state.location,
                new_location,
                std::process::id(),
                self.id,
            );
            state.location = new_location.to_path_buf();

            match ensure_location_dir(new_location) {
                Ok(()) => {
                    if self.remote.is_remote(new_location) {
                        state.active = false;
                    }
                }
                Err(err) => {
                    warning = Some(format!(
                        "could not create cache location '{}': {err}",
                        new_location.display()
                    ));
                    state.active = false;
                }
            }
        }

        if let Some(warning) = warning {
            self.warn(warning);
        }
    }

    /// Set the byte budget for this cache's location, in decimal megabytes
    /// (multiples of 1,000,000, not 1,048,576).
    ///
    /// The budget is shared: it applies to every instance at the location,
    /// in this process and any other that consults it.
    pub fn resize(&self, megabytes: u64) {
        let _op = self.inventory.op_guard();
        let location = self.read_state().location.clone();
        self.inventory
            .set_budget(&location, megabytes.saturating_mul(1_000_000));
    }

    /// The byte budget currently configured for this cache's location;
    /// 0 means unlimited.
    pub fn size(&self) -> u64 {
        let location = self.read_state().location.clone();
        self.inventory.budget(&location)
    }

    /// This cache's location.
    pub fn location(&self) -> PathBuf {
        self.read_state().location.clone()
    }

    /// Toggle warning output for this instance.
    pub fn babble(&self, verbose: bool) {
        self.write_state().verbose = verbose;
    }

    fn copy_to_cache(&self, location: &Path, source: &Path, cached: &Path) -> Result<PathBuf> {
        let incoming = fs::metadata(source)?.len();
        if !tidy::ensure_room(&self.inventory, location, incoming)? {
            return Err(CacheError::BudgetExhausted {
                location: location.to_path_buf(),
            });
        }

        util::copy_overwrite(source, cached)?;
        self.inventory
            .add_hold(location, std::process::id(), self.id, cached);
        tracing::debug!(
            target = "filecache",
            source = %source.display(),
            cached = %cached.display(),
            "copied into cache"
        );
        Ok(cached.to_path_buf())
    }

    fn snapshot(&self) -> (bool, PathBuf) {
        let state = self.read_state();
        (state.active, state.location.clone())
    }

    fn warn(&self, message: impl AsRef<str>) {
        if !self.read_state().verbose {
            return;
        }
        let message = message.as_ref();
        match &self.process_name {
            Some(name) => {
                tracing::warn!(target = "filecache", "[FileCache:{name}] WARNING: {message}");
            }
            None => {
                tracing::warn!(target = "filecache", "[FileCache] WARNING: {message}");
            }
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, InstanceState> {
        self.state.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, InstanceState> {
        self.state.write().unwrap_or_else(|err| err.into_inner())
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        let _op = self.inventory.op_guard();
        let location = self.read_state().location.clone();
        self.inventory
            .unregister_instance(&location, std::process::id(), self.id);
    }
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("id", &self.id)
            .field("location", &self.read_state().location)
            .finish()
    }
}

/// Instances compare equal when they share a cache location.
impl PartialEq for FileCache {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.read_state().location == other.read_state().location
    }
}

fn resolve_location(requested: &Path) -> (PathBuf, bool) {
    if !requested.as_os_str().is_empty() {
        return (requested.to_path_buf(), false);
    }

    match std::env::var(LOCATION_ENV) {
        Ok(value) if !value.is_empty() => (PathBuf::from(value), true),
        _ => (PathBuf::from(DEFAULT_LOCATION), false),
    }
}

fn ensure_location_dir(location: &Path) -> Result<()> {
    fs::create_dir_all(location).map_err(|source| CacheError::LocationCreate {
        path: location.to_path_buf(),
        source,
    })
}

fn process_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    let name = exe.file_name()?;
    name.to_str().map(str::to_string)
}
