//! Archive handles
//!
//! An [`ArchiveHandle`] wraps one physical ZIP container. The container is a single
//! seekable stream, so every read or extraction takes the handle's lock; the entry and
//! directory indexes are built at open time and are queried without locking.
//!
//! Handles are shared through an [`ArchiveCache`] so that every mount pointing at the
//! same physical archive uses the same handle.

mod extract;
mod index;

pub use index::ArchiveEntry;
pub(crate) use extract::output_path;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use zip::ZipArchive;

use crate::config::Layout;
use crate::error::{ImportError, Result};
use index::ArchiveIndex;

/// Upper bound on the buffer reserved up front from an entry's declared size
const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// Lock-guarded accessor for one archive
pub struct ArchiveHandle {
    path: PathBuf,
    index: ArchiveIndex,
    zip: Mutex<ZipArchive<File>>,
    extractions: AtomicU64,
}

impl std::fmt::Debug for ArchiveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveHandle")
            .field("path", &self.path)
            .field("entries", &self.index.len())
            .finish()
    }
}

impl ArchiveHandle {
    /// Open an archive and read its complete catalogue.
    ///
    /// Any failure here means the archive exists but cannot be used, which is fatal
    /// for the caller.
    pub fn open(path: &Path, layout: &Layout) -> Result<Self> {
        let file = File::open(path).map_err(|e| ImportError::corrupt(path, e))?;
        let mut zip = ZipArchive::new(file).map_err(|e| ImportError::corrupt(path, e))?;

        let mut catalogue = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let file = zip
                .by_index_raw(i)
                .map_err(|e| ImportError::corrupt(path, e))?;
            let name = normalize_name(file.name()).ok_or_else(|| {
                ImportError::corrupt(
                    path,
                    format!("entry '{}' escapes the archive root", file.name()),
                )
            })?;
            // `./` and the like name the root itself.
            if name.is_empty() {
                continue;
            }
            catalogue.push(ArchiveEntry {
                size: file.size(),
                mtime: extract::zip_time_to_unix(file.last_modified()),
                name,
                index: i,
            });
        }

        let index = ArchiveIndex::build(catalogue, &layout.autorun_suffix);
        debug!(
            archive = %path.display(),
            entries = index.len(),
            autorun = index.autorun().len(),
            "opened archive"
        );

        Ok(Self {
            path: path.to_path_buf(),
            index,
            zip: Mutex::new(zip),
            extractions: AtomicU64::new(0),
        })
    }

    /// Physical location of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up an entry by its exact archive path.
    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.index.entry(name)
    }

    /// All entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.index.entries()
    }

    /// Number of entries in the catalogue.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.index.len() == 0
    }

    /// Top-level autorun files, in catalogue order.
    pub fn autorun_files(&self) -> &[String] {
        self.index.autorun()
    }

    /// Whether `path` is a directory, literal or implied by its descendants.
    pub fn is_dir(&self, path: &str) -> bool {
        self.index.is_dir(path)
    }

    /// Sorted immediate children of a directory, or `None` if it is not one.
    pub fn list_dir(&self, path: &str) -> Option<Vec<String>> {
        self.index.list_dir(path)
    }

    /// Read an entry's uncompressed bytes.
    pub fn read(&self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        let mut zip = self.zip.lock();
        let mut file = zip
            .by_index(entry.index)
            .map_err(|e| ImportError::corrupt(&self.path, e))?;

        let mut data = Vec::with_capacity(prealloc_len(entry.size));
        file.read_to_end(&mut data)
            .map_err(|e| ImportError::corrupt(&self.path, format!("{}: {}", entry.name, e)))?;
        Ok(data)
    }

    /// Read an entry by its archive path.
    pub fn read_path(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.entry(name).ok_or_else(|| ImportError::EntryNotFound {
            archive: self.path.clone(),
            name: name.to_string(),
        })?;
        self.read(entry)
    }

    /// Return the extracted copy of `entry` under `target_dir`, extracting it first
    /// unless an existing copy matches the entry's size and modification time.
    pub fn extract_if_changed(&self, entry: &ArchiveEntry, target_dir: &Path) -> Result<PathBuf> {
        let out_path = extract::output_path(target_dir, &entry.name);
        if !entry.is_dir() && extract::is_current(&out_path, entry) {
            return Ok(out_path);
        }
        self.write_entry(entry, target_dir)
    }

    fn write_entry(&self, entry: &ArchiveEntry, target_dir: &Path) -> Result<PathBuf> {
        let out_path = extract::output_path(target_dir, &entry.name);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| ImportError::extraction(&out_path, e))?;
            return Ok(out_path);
        }

        let mut zip = self.zip.lock();
        // Another thread may have finished the same extraction while we waited.
        if extract::is_current(&out_path, entry) {
            return Ok(out_path);
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ImportError::extraction(parent, e))?;
        }

        let mut file = zip
            .by_index(entry.index)
            .map_err(|e| ImportError::corrupt(&self.path, e))?;
        let mut out_file =
            File::create(&out_path).map_err(|e| ImportError::extraction(&out_path, e))?;
        io::copy(&mut file, &mut out_file).map_err(|e| ImportError::extraction(&out_path, e))?;
        drop(out_file);

        extract::stamp(&out_path, entry).map_err(|e| ImportError::extraction(&out_path, e))?;
        self.extractions.fetch_add(1, Ordering::Relaxed);

        debug!(
            archive = %self.path.display(),
            entry = %entry.name,
            target = %out_path.display(),
            "extracted"
        );
        Ok(out_path)
    }

    /// Number of files this handle has written to disk.
    pub fn extraction_count(&self) -> u64 {
        self.extractions.load(Ordering::Relaxed)
    }
}

/// Bytes to reserve for an entry whose header declares `size`.
fn prealloc_len(size: u64) -> usize {
    usize::try_from(size).map_or(0, |size| size.min(MAX_PREALLOC))
}

/// Normalize an entry name: drop `.` and empty segments, keeping the trailing `/` of
/// directory entries. `None` if the name is absolute or climbs out of the archive root.
fn normalize_name(name: &str) -> Option<String> {
    if name.is_empty() || name.starts_with('/') || name.contains('\\') {
        return None;
    }
    let mut parts = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            part => parts.push(part),
        }
    }
    let mut normalized = parts.join("/");
    if name.ends_with('/') && !normalized.is_empty() {
        normalized.push('/');
    }
    Some(normalized)
}

/// Path-keyed cache of open archive handles
#[derive(Debug, Default)]
pub struct ArchiveCache {
    handles: Mutex<HashMap<PathBuf, Arc<ArchiveHandle>>>,
}

impl ArchiveCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared handle for `path`, opening the archive on first use.
    pub fn get_or_open(&self, path: &Path, layout: &Layout) -> Result<Arc<ArchiveHandle>> {
        let mut handles = self.handles.lock();
        if let Some(handle) = handles.get(path) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(ArchiveHandle::open(path, layout)?);
        handles.insert(path.to_path_buf(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Whether no archive has been opened yet.
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}
