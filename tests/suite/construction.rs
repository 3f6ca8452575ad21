use crate::{EnvVarGuard, Rig, TreeProbe};
use filecache::{
    CacheOptions, FileCache, SharedInventory, DEFAULT_LOCATION, LOCATION_ENV, SIZE_ENV,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn env_resolved_cache(inventory: &Arc<SharedInventory>, remote_root: &Path) -> FileCache {
    FileCache::with_options(CacheOptions {
        location: PathBuf::new(),
        activate: true,
        remote_probe: Arc::new(TreeProbe {
            root: remote_root.to_path_buf(),
        }),
        inventory: Arc::clone(inventory),
    })
}

#[test]
fn empty_location_resolves_from_the_environment() {
    let _guard = crate::test_lock();
    let temp = tempfile::tempdir().unwrap();
    let env_location = temp.path().join("envcache");
    let _location = EnvVarGuard::set(LOCATION_ENV, &env_location);
    let _size = EnvVarGuard::unset(SIZE_ENV);

    let inventory = Arc::new(SharedInventory::new());
    let cache = env_resolved_cache(&inventory, &temp.path().join("remote"));

    assert_eq!(cache.location(), env_location);
    assert!(env_location.is_dir(), "the cache directory is created eagerly");
}

#[test]
fn uncreatable_env_location_falls_back_to_the_default() {
    let _guard = crate::test_lock();
    let temp = tempfile::tempdir().unwrap();
    // A path below a regular file can never be created.
    let blocker = temp.path().join("blocker");
    fs::write(&blocker, b"").unwrap();
    let _location = EnvVarGuard::set(LOCATION_ENV, blocker.join("cache"));
    let _size = EnvVarGuard::unset(SIZE_ENV);

    let inventory = Arc::new(SharedInventory::new());
    let cache = env_resolved_cache(&inventory, &temp.path().join("remote"));

    assert_eq!(cache.location(), Path::new(DEFAULT_LOCATION));
}

#[test]
fn unset_environment_uses_the_default_location() {
    let _guard = crate::test_lock();
    let _location = EnvVarGuard::unset(LOCATION_ENV);
    let _size = EnvVarGuard::unset(SIZE_ENV);

    let temp = tempfile::tempdir().unwrap();
    let inventory = Arc::new(SharedInventory::new());
    let cache = env_resolved_cache(&inventory, &temp.path().join("remote"));

    assert_eq!(cache.location(), Path::new(DEFAULT_LOCATION));
}

#[test]
fn size_env_is_a_byte_budget() {
    let _guard = crate::test_lock();
    let _size = EnvVarGuard::set(SIZE_ENV, "123456");

    let rig = Rig::new();
    let cache = rig.cache();

    assert_eq!(cache.size(), 123_456, "FILECACHE_SIZE is bytes, not megabytes");
}

#[test]
fn unparsable_size_env_is_ignored() {
    let _guard = crate::test_lock();
    let _size = EnvVarGuard::set(SIZE_ENV, "lots");

    let rig = Rig::new();
    let cache = rig.cache();

    assert_eq!(cache.size(), 0);
}

#[test]
fn remote_cache_location_deactivates_caching() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    // A probe that classifies the whole scratch tree as remote also covers
    // the cache directory itself.
    let cache = FileCache::with_options(CacheOptions {
        location: rig.cache_dir.clone(),
        activate: true,
        remote_probe: Arc::new(TreeProbe {
            root: rig.temp.path().to_path_buf(),
        }),
        inventory: Arc::clone(&rig.inventory),
    });

    let original = rig.remote_file("a.bin", 1024);
    assert_eq!(cache.acquire_read(&original), original);
    assert_eq!(fs::read_dir(&rig.cache_dir).unwrap().count(), 0);
}

#[test]
fn resize_is_visible_to_every_instance_at_the_location() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let a = rig.cache();
    let b = rig.cache();

    a.resize(10);

    assert_eq!(b.size(), 10_000_000, "decimal megabytes, shared per location");
}

#[test]
fn relocate_releases_old_holds_and_keeps_working() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let original = rig.remote_file("a.bin", 1024);

    let cached = cache.acquire_read(&original);
    assert!(rig.inventory.is_held_anywhere(&rig.cache_dir, &cached));

    let new_location = rig.temp.path().join("cache-two");
    cache.relocate(&new_location);

    assert_eq!(cache.location(), new_location);
    assert!(!rig.inventory.is_held_anywhere(&rig.cache_dir, &cached));

    let reacquired = cache.acquire_read(&original);
    assert_eq!(reacquired.parent(), Some(new_location.as_path()));
}

#[test]
fn relocate_to_the_current_location_is_a_no_op() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let original = rig.remote_file("a.bin", 1024);

    let cached = cache.acquire_read(&original);
    cache.relocate(&rig.cache_dir);

    assert_eq!(cache.location(), rig.cache_dir);
    assert!(
        rig.inventory.is_held_anywhere(&rig.cache_dir, &cached),
        "holds survive a no-op relocation"
    );
}

#[test]
fn teardown_unregisters_the_instance_and_prunes_the_inventory() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let original = rig.remote_file("a.bin", 1024);

    let cached = cache.acquire_read(&original);
    assert_eq!(rig.inventory.location_count(), 1);
    drop(cache);

    assert!(!rig.inventory.is_held_anywhere(&rig.cache_dir, &cached));
    assert_eq!(rig.inventory.location_count(), 0, "empty parents are pruned");
    assert_eq!(rig.inventory.instance_count(std::process::id()), 0);
    assert!(cached.exists(), "teardown never deletes files from disk");
}

#[test]
fn instances_compare_equal_when_they_share_a_location() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let a = rig.cache();
    let b = rig.cache();
    assert_eq!(a, b);

    b.relocate(rig.temp.path().join("cache-two"));
    assert_ne!(a, b);
}
