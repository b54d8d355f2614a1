//! Extraction cache bookkeeping
//!
//! An extracted file is current when its size and modification time both match the
//! archive entry. The timestamp is the last thing written, so a file left behind by an
//! interrupted extraction never looks current.
//!
//! Archive timestamps are normalized for reproducible builds, so they say nothing about
//! which files changed between application versions. Whole-cache invalidation after an
//! update is the caller's job.

use chrono::NaiveDate;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};

use super::ArchiveEntry;

/// 1980-01-01T00:00:00Z, the earliest time a ZIP entry can carry.
const DOS_EPOCH: i64 = 315_532_800;

/// Convert a ZIP date/time (taken as UTC) to Unix seconds.
pub(crate) fn zip_time_to_unix(time: Option<zip::DateTime>) -> i64 {
    time.and_then(|t| {
        NaiveDate::from_ymd_opt(t.year() as i32, t.month() as u32, t.day() as u32)?
            .and_hms_opt(t.hour() as u32, t.minute() as u32, t.second() as u32)
            .map(|dt| dt.and_utc().timestamp())
    })
    .unwrap_or(DOS_EPOCH)
}

/// Path of an entry below `target_dir`, mirroring the archive layout.
pub(crate) fn output_path(target_dir: &Path, entry_name: &str) -> PathBuf {
    let mut path = target_dir.to_path_buf();
    for part in entry_name.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

/// Whether the file at `path` matches the entry's size and modification time.
pub(crate) fn is_current(path: &Path, entry: &ArchiveEntry) -> bool {
    match fs::metadata(path) {
        Ok(meta) => {
            meta.is_file()
                && meta.len() == entry.size
                && FileTime::from_last_modification_time(&meta) == entry_mtime(entry)
        }
        Err(_) => false,
    }
}

/// The timestamp an extracted copy of `entry` must carry.
pub(crate) fn entry_mtime(entry: &ArchiveEntry) -> FileTime {
    FileTime::from_unix_time(entry.mtime, 0)
}

/// Stamp an extracted file with the entry's timestamp. Must be the final write.
pub(crate) fn stamp(path: &Path, entry: &ArchiveEntry) -> std::io::Result<()> {
    filetime::set_file_times(path, FileTime::now(), entry_mtime(entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_time_to_unix() {
        let t = zip::DateTime::from_date_and_time(2020, 1, 2, 3, 4, 6).unwrap();
        assert_eq!(zip_time_to_unix(Some(t)), 1_577_934_246);
        assert_eq!(zip_time_to_unix(None), DOS_EPOCH);
    }

    #[test]
    fn test_output_path_mirrors_layout() {
        let root = Path::new("/cache/app.zip");
        assert_eq!(
            output_path(root, "pkg/sub/mod.so"),
            PathBuf::from("/cache/app.zip/pkg/sub/mod.so")
        );
        assert_eq!(output_path(root, "pkg/"), PathBuf::from("/cache/app.zip/pkg"));
    }

    #[test]
    fn test_is_current() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("file.bin");
        fs::write(&path, b"12345").unwrap();

        let entry = ArchiveEntry {
            name: "file.bin".to_string(),
            size: 5,
            mtime: 1_000_000_000,
            index: 0,
        };
        assert!(!is_current(&path, &entry));

        stamp(&path, &entry).unwrap();
        assert!(is_current(&path, &entry));

        let bigger = ArchiveEntry { size: 6, ..entry.clone() };
        assert!(!is_current(&path, &bigger));

        assert!(!is_current(&temp.path().join("missing"), &entry));
    }
}
