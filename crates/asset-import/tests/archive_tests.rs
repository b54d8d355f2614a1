//! Integration tests for archive handles and the extraction cache

mod common;

use asset_import::{ArchiveCache, ArchiveHandle, ImportError, Layout};
use common::{write_zip, ENTRY_MTIME};
use filetime::FileTime;
use std::fs;
use std::sync::Arc;
use std::thread;

fn sample_archive(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("pkg.zip");
    write_zip(
        &path,
        &[
            ("mypackage/__init__.py", b"set kind package"),
            ("mypackage/sub.py", b"set kind module"),
            ("mypackage/data/blob.bin", b"0123456789"),
            ("explicit/", b""),
            ("explicit/inner.py", b""),
            ("init.pth", b"import mypackage"),
            ("mypackage/nested.pth", b""),
        ],
    );
    path
}

#[test]
fn test_directory_index_synthesized() {
    let temp = tempfile::tempdir().unwrap();
    let handle = ArchiveHandle::open(&sample_archive(temp.path()), &Layout::default()).unwrap();

    assert!(handle.is_dir(""));
    assert!(handle.is_dir("mypackage"));
    assert!(handle.is_dir("mypackage/data"));
    assert!(!handle.is_dir("mypackage/sub.py"));

    assert_eq!(
        handle.list_dir("").unwrap(),
        vec!["explicit", "init.pth", "mypackage"]
    );
    assert_eq!(
        handle.list_dir("mypackage").unwrap(),
        vec!["__init__.py", "data", "nested.pth", "sub.py"]
    );
    assert_eq!(handle.list_dir("explicit").unwrap(), vec!["inner.py"]);
    assert_eq!(handle.autorun_files(), &["init.pth".to_string()]);
}

#[test]
fn test_entry_metadata_and_read() {
    let temp = tempfile::tempdir().unwrap();
    let handle = ArchiveHandle::open(&sample_archive(temp.path()), &Layout::default()).unwrap();

    let entry = handle.entry("mypackage/data/blob.bin").unwrap();
    assert_eq!(entry.size, 10);
    assert_eq!(entry.mtime, ENTRY_MTIME);
    assert_eq!(handle.read(entry).unwrap(), b"0123456789");
    assert_eq!(handle.read_path("mypackage/sub.py").unwrap(), b"set kind module");

    assert!(matches!(
        handle.read_path("mypackage/missing.py"),
        Err(ImportError::EntryNotFound { .. })
    ));
}

#[test]
fn test_empty_archive() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("empty.zip");
    write_zip(&path, &[]);

    let handle = ArchiveHandle::open(&path, &Layout::default()).unwrap();
    assert!(handle.is_empty());
    assert!(handle.is_dir(""));
    assert_eq!(handle.list_dir(""), Some(Vec::new()));
}

#[test]
fn test_extract_if_changed_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let handle = ArchiveHandle::open(&sample_archive(temp.path()), &Layout::default()).unwrap();
    let target = temp.path().join("cache");
    let entry = handle.entry("mypackage/data/blob.bin").unwrap();

    let first = handle.extract_if_changed(entry, &target).unwrap();
    assert_eq!(first, target.join("mypackage").join("data").join("blob.bin"));
    assert_eq!(fs::read(&first).unwrap(), b"0123456789");
    assert_eq!(handle.extraction_count(), 1);

    let meta = fs::metadata(&first).unwrap();
    assert_eq!(
        FileTime::from_last_modification_time(&meta),
        FileTime::from_unix_time(ENTRY_MTIME, 0)
    );

    let second = handle.extract_if_changed(entry, &target).unwrap();
    assert_eq!(second, first);
    assert_eq!(handle.extraction_count(), 1);
}

#[test]
fn test_modified_copy_is_reextracted() {
    let temp = tempfile::tempdir().unwrap();
    let handle = ArchiveHandle::open(&sample_archive(temp.path()), &Layout::default()).unwrap();
    let target = temp.path().join("cache");
    let entry = handle.entry("mypackage/data/blob.bin").unwrap();
    let path = handle.extract_if_changed(entry, &target).unwrap();

    // Same size, different timestamp: what an interrupted extraction leaves behind.
    fs::write(&path, b"xxxxxxxxxx").unwrap();
    handle.extract_if_changed(entry, &target).unwrap();
    assert_eq!(handle.extraction_count(), 2);
    assert_eq!(fs::read(&path).unwrap(), b"0123456789");
    let meta = fs::metadata(&path).unwrap();
    assert_eq!(
        FileTime::from_last_modification_time(&meta),
        FileTime::from_unix_time(ENTRY_MTIME, 0)
    );

    // Different size, matching timestamp.
    fs::write(&path, b"short").unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(ENTRY_MTIME, 0)).unwrap();
    handle.extract_if_changed(entry, &target).unwrap();
    assert_eq!(handle.extraction_count(), 3);
    assert_eq!(fs::read(&path).unwrap(), b"0123456789");

    // Deleted copy.
    fs::remove_file(&path).unwrap();
    handle.extract_if_changed(entry, &target).unwrap();
    assert_eq!(handle.extraction_count(), 4);
}

#[test]
fn test_escaping_entry_is_corrupt() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("evil.zip");
    write_zip(&path, &[("../evil.py", b"")]);

    assert!(matches!(
        ArchiveHandle::open(&path, &Layout::default()),
        Err(ImportError::ArchiveCorrupt { .. })
    ));
}

#[test]
fn test_entry_names_are_normalized() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("loose.zip");
    write_zip(
        &path,
        &[("./mod.py", b"set x 1"), ("pkg//sub.py", b"set y 2")],
    );
    let handle = ArchiveHandle::open(&path, &Layout::default()).unwrap();

    assert_eq!(handle.list_dir("").unwrap(), vec!["mod.py", "pkg"]);
    assert_eq!(handle.list_dir("pkg").unwrap(), vec!["sub.py"]);
    assert_eq!(handle.len(), 2);
    assert_eq!(handle.read_path("mod.py").unwrap(), b"set x 1");
    assert_eq!(handle.entry("pkg/sub.py").unwrap().name, "pkg/sub.py");

    let target = temp.path().join("out");
    let out = handle
        .extract_if_changed(handle.entry("pkg/sub.py").unwrap(), &target)
        .unwrap();
    assert_eq!(out, target.join("pkg").join("sub.py"));
}

#[test]
fn test_cache_shares_handles() {
    let temp = tempfile::tempdir().unwrap();
    let path = sample_archive(temp.path());
    let cache = ArchiveCache::new();

    let a = cache.get_or_open(&path, &Layout::default()).unwrap();
    let b = cache.get_or_open(&path, &Layout::default()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_concurrent_reads_and_extractions() {
    let temp = tempfile::tempdir().unwrap();
    let path = sample_archive(temp.path());
    let cache = Arc::new(ArchiveCache::new());
    let target = temp.path().join("cache");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let path = path.clone();
            let target = target.clone();
            thread::spawn(move || {
                let handle = cache.get_or_open(&path, &Layout::default()).unwrap();
                for _ in 0..20 {
                    assert_eq!(handle.read_path("mypackage/sub.py").unwrap(), b"set kind module");
                    if i % 2 == 0 {
                        let entry = handle.entry("mypackage/data/blob.bin").unwrap();
                        let out = handle.extract_if_changed(entry, &target).unwrap();
                        assert_eq!(fs::metadata(out).unwrap().len(), 10);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(cache.len(), 1);
    let handle = cache.get_or_open(&path, &Layout::default()).unwrap();
    assert!(handle.extraction_count() >= 1);
}
