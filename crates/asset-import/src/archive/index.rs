//! Entry and directory indexes
//!
//! Containers may or may not carry explicit entries for directories, so the directory
//! index is synthesized from entry paths. Both indexes are built once and never change.

use std::collections::{BTreeSet, HashMap};

/// Metadata of one archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// `/`-separated path inside the archive (directories end with `/`)
    pub name: String,

    /// Uncompressed size in bytes
    pub size: u64,

    /// Modification time recorded in the archive, in Unix seconds
    pub mtime: i64,

    /// Position of the entry in the container's catalogue
    pub(crate) index: usize,
}

impl ArchiveEntry {
    /// Whether this is a literal directory entry.
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Immutable lookup structures for one archive
#[derive(Debug, Default)]
pub(crate) struct ArchiveIndex {
    entries: HashMap<String, ArchiveEntry>,
    dirs: HashMap<String, BTreeSet<String>>,
    autorun: Vec<String>,
}

impl ArchiveIndex {
    /// Build the indexes from the catalogue, in catalogue order.
    pub fn build(catalogue: Vec<ArchiveEntry>, autorun_suffix: &str) -> Self {
        let mut dirs: HashMap<String, BTreeSet<String>> = HashMap::new();
        // Empty listing for the root even if the archive is empty.
        dirs.insert(String::new(), BTreeSet::new());

        let mut autorun = Vec::new();
        let mut entries = HashMap::with_capacity(catalogue.len());

        for entry in catalogue {
            let trimmed = entry.name.trim_end_matches('/');
            let mut parts: Vec<&str> = trimmed.split('/').filter(|p| !p.is_empty()).collect();

            // Walk upwards until an already-known parent is reached.
            while let Some(last) = parts.pop() {
                let parent = parts.join("/");
                if let Some(children) = dirs.get_mut(&parent) {
                    children.insert(last.to_string());
                    break;
                }
                dirs.insert(parent, BTreeSet::from([last.to_string()]));
            }

            if entry.is_dir() {
                dirs.entry(trimmed.to_string()).or_default();
            } else if !entry.name.contains('/') && entry.name.ends_with(autorun_suffix) {
                autorun.push(entry.name.clone());
            }

            entries.insert(entry.name.clone(), entry);
        }

        Self {
            entries,
            dirs,
            autorun,
        }
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn autorun(&self) -> &[String] {
        &self.autorun
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains_key(path.trim_end_matches('/'))
    }

    pub fn list_dir(&self, path: &str) -> Option<Vec<String>> {
        self.dirs
            .get(path.trim_end_matches('/'))
            .map(|children| children.iter().cloned().collect())
    }
}
