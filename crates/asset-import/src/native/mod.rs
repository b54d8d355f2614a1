//! Native dependency resolution
//!
//! Some dynamic linkers only search system directories for a library's `DT_NEEDED`
//! entries, so libraries shipped inside archives have to be loaded by hand, dependencies
//! first, before the library that needs them.
//!
//! A dependency that no mount provides is not an error: the platform linker is expected
//! to find it on its own search path.

pub mod elf;
pub mod library;

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::context::ImportContext;
use crate::error::{ImportError, Result};
use elf::ElfError;
use library::{Library, Visibility};

/// Process-wide map from logical library name to its loaded handle
///
/// Entries are never removed and handles are never closed.
#[derive(Debug, Default)]
pub struct NativeRegistry {
    loaded: Mutex<HashMap<String, Arc<Library>>>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every library `path` declares as needed, depth-first and in declaration
    /// order, skipping names that are already loaded.
    ///
    /// The whole sequence runs under the registry lock, so two threads resolving the
    /// same library cannot both load it.
    pub fn load_needed(&self, ctx: &ImportContext, path: &Path) -> Result<()> {
        let mut loaded = self.loaded.lock();
        let mut visiting = HashSet::new();
        load_needed_locked(ctx, path, &mut loaded, &mut visiting)
    }

    /// Handle of a loaded library, by logical name
    pub fn get(&self, name: &str) -> Option<Arc<Library>> {
        self.loaded.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaded.lock().contains_key(name)
    }

    /// Sorted logical names of all loaded libraries
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaded.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.loaded.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.lock().is_empty()
    }
}

fn load_needed_locked(
    ctx: &ImportContext,
    path: &Path,
    loaded: &mut HashMap<String, Arc<Library>>,
    visiting: &mut HashSet<String>,
) -> Result<()> {
    for name in needed_by(path)? {
        if loaded.contains_key(&name) || visiting.contains(&name) {
            continue;
        }

        let entry_name = format!("{}/{}", ctx.config().layout.native_lib_dir, name);
        let mut provided = false;
        for mount in ctx.active_mounts()? {
            let Some(entry) = mount.archive().entry(&entry_name) else {
                continue;
            };
            let extracted = mount.extract_if_changed(entry)?;

            visiting.insert(name.clone());
            let result = load_needed_locked(ctx, &extracted, loaded, visiting);
            visiting.remove(&name);
            result?;

            let library = ctx.linker().open(&extracted, Visibility::Global)?;
            debug!(
                library = %name,
                path = %extracted.display(),
                needed_by = %path.display(),
                "loaded native dependency"
            );
            loaded.insert(name.clone(), Arc::new(library));
            provided = true;
            break;
        }

        if !provided {
            debug!(library = %name, needed_by = %path.display(), "dependency left to the platform linker");
        }
    }
    Ok(())
}

/// `DT_NEEDED` names of the ELF file at `path`
pub fn needed_by(path: &Path) -> Result<Vec<String>> {
    let data = fs::read(path)?;
    elf::needed_libraries(&data).map_err(|e| match e {
        ElfError::MissingDynamicSection => ImportError::MissingDynamicSection(path.to_path_buf()),
        source => ImportError::Elf {
            path: path.to_path_buf(),
            source,
        },
    })
}
