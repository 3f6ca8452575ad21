use crate::{make_payload, Rig};
use filecache::to_original;
use std::fs;
use std::time::Duration;

#[test]
fn cold_read_mirrors_the_remote_file() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let original = rig.remote_file("a.bin", 64 * 1024);

    let acquired = cache.acquire_read(&original);

    assert_ne!(acquired, original);
    assert_eq!(acquired.parent(), Some(rig.cache_dir.as_path()));
    assert_eq!(to_original(&acquired).unwrap(), original);
    assert_eq!(fs::read(&acquired).unwrap(), fs::read(&original).unwrap());
}

#[test]
fn local_files_pass_through_untouched() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let local = rig.local_file("local.bin", 1024);

    assert_eq!(cache.acquire_read(&local), local);
    assert_eq!(fs::read_dir(&rig.cache_dir).unwrap().count(), 0);
}

#[test]
fn inactive_cache_passes_through_untouched() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache_with_activate(false);
    let original = rig.remote_file("a.bin", 1024);

    assert_eq!(cache.acquire_read(&original), original);
    assert_eq!(fs::read_dir(&rig.cache_dir).unwrap().count(), 0);
}

#[test]
fn missing_original_falls_back_to_the_given_path() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let missing = rig.remote_root.join("missing.bin");

    assert_eq!(cache.acquire_read(&missing), missing);
}

#[test]
fn second_instance_reuses_the_cached_copy() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let first = rig.cache();
    let second = rig.cache();
    let original = rig.remote_file("shared.bin", 8 * 1024);

    let a = first.acquire_read(&original);
    let b = second.acquire_read(&original);

    assert_eq!(a, b);
    assert_eq!(fs::read(&b).unwrap(), fs::read(&original).unwrap());
}

#[test]
fn refresh_is_refused_while_another_instance_holds_the_copy() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let holder = rig.cache();
    let other = rig.cache();
    let original = rig.remote_file("x.bin", 4 * 1024);

    let held = holder.acquire_read(&original);
    assert_ne!(held, original);

    // The original changes on the remote side: new mtime, different size.
    std::thread::sleep(Duration::from_millis(30));
    fs::write(&original, make_payload(6 * 1024)).unwrap();

    // The copy is outdated but in use; the other instance gets the original.
    assert_eq!(other.acquire_read(&original), original);
    assert_eq!(fs::read(&held).unwrap(), make_payload(4 * 1024));
}

#[test]
fn holder_keeps_its_committed_version_after_the_original_changes() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let original = rig.remote_file("x.bin", 4 * 1024);

    let held = cache.acquire_read(&original);
    std::thread::sleep(Duration::from_millis(30));
    fs::write(&original, make_payload(6 * 1024)).unwrap();

    // This instance already committed to the cached version.
    assert_eq!(cache.acquire_read(&original), held);
    assert_eq!(fs::read(&held).unwrap(), make_payload(4 * 1024));
}

#[test]
fn unheld_outdated_copy_is_refreshed() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let original = rig.remote_file("x.bin", 4 * 1024);

    let cached = cache.acquire_read(&original);
    cache.release(&cached);

    std::thread::sleep(Duration::from_millis(30));
    fs::write(&original, make_payload(6 * 1024)).unwrap();

    let refreshed = cache.acquire_read(&original);
    assert_eq!(refreshed, cached);
    assert_eq!(fs::read(&refreshed).unwrap(), make_payload(6 * 1024));
}

#[test]
fn released_then_reacquired_copy_is_not_copied_again() {
    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let original = rig.remote_file("steady.bin", 4 * 1024);

    let cached = cache.acquire_read(&original);
    let first_mtime = fs::metadata(&cached).unwrap().modified().unwrap();
    cache.release(&cached);

    let again = cache.acquire_read(&original);
    assert_eq!(again, cached);
    assert_eq!(
        fs::metadata(&again).unwrap().modified().unwrap(),
        first_mtime,
        "an up-to-date copy must be registered, not rewritten"
    );
}

#[cfg(unix)]
#[test]
fn symlinked_originals_cache_under_their_target() {
    use std::os::unix::fs::symlink;

    let _guard = crate::test_lock();
    let rig = Rig::new();
    let cache = rig.cache();
    let target = rig.remote_file("target.bin", 2 * 1024);
    let link = rig.remote_root.join("link.bin");
    symlink(&target, &link).unwrap();

    let via_link = cache.acquire_read(&link);
    let via_target = cache.acquire_read(&target);

    assert_eq!(via_link, via_target, "one file, one cache entry");
    assert_eq!(to_original(&via_link).unwrap(), target);
}
