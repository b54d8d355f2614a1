//! Module loaders
//!
//! A loader is bound to one archive entry found by a [`Mount`] under one module name.
//! The shared load protocol lives in the [`ModuleLoader`] default methods; each artifact
//! kind only supplies [`ModuleLoader::exec_load`].
//!
//! Which kind handles an entry is decided by suffix, in [`LOADER_PRIORITY`] order.

mod native;
mod source;

pub use native::NativeLoader;
pub use source::{decode_source, SourceLoader};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::archive::{output_path, ArchiveEntry};
use crate::config::Layout;
use crate::context::ImportContext;
use crate::error::{ImportError, Result};
use crate::module::{LoaderIdentity, Module};
use crate::mount::Mount;

/// Kind of artifact a loader handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderKind {
    /// Interpreted source, executed from its decoded text
    Source,
    /// Compiled extension, extracted and dynamically loaded
    Native,
}

/// Lookup order when several artifact kinds match the same name
pub const LOADER_PRIORITY: [LoaderKind; 2] = [LoaderKind::Source, LoaderKind::Native];

impl LoaderKind {
    /// File suffix this kind is registered under
    pub fn suffix(self, layout: &Layout) -> &str {
        match self {
            LoaderKind::Source => &layout.source_suffix,
            LoaderKind::Native => &layout.native_suffix,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LoaderKind::Source => "source",
            LoaderKind::Native => "native",
        }
    }
}

impl std::fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Module name of an archive file name, if it carries a supported suffix
pub fn module_name_of<'a>(filename: &'a str, layout: &Layout) -> Option<&'a str> {
    LOADER_PRIORITY.iter().find_map(|kind| {
        filename
            .strip_suffix(kind.suffix(layout))
            .filter(|stem| !stem.is_empty() && !stem.contains('.'))
    })
}

/// What every loader is bound to
#[derive(Debug, Clone)]
pub struct LoaderCore {
    pub(crate) mount: Arc<Mount>,
    pub(crate) real_name: String,
    pub(crate) entry: ArchiveEntry,
}

impl LoaderCore {
    pub fn new(mount: Arc<Mount>, real_name: &str, entry: ArchiveEntry) -> Self {
        Self {
            mount,
            real_name: real_name.to_string(),
            entry,
        }
    }
}

/// The load protocol shared by all artifact kinds
pub trait ModuleLoader {
    fn core(&self) -> &LoaderCore;

    fn kind(&self) -> LoaderKind;

    /// Create or re-execute the module under `mod_name` and install it in the registry.
    fn exec_load(&self, ctx: &ImportContext, mod_name: &str) -> Result<()>;

    /// Refuse loading under `load_name` if this kind cannot rebind its identity.
    fn check_rename(&self, _load_name: &str) -> Result<()> {
        Ok(())
    }

    /// Name the loader was resolved for
    fn real_name(&self) -> &str {
        &self.core().real_name
    }

    fn mount(&self) -> &Arc<Mount> {
        &self.core().mount
    }

    fn entry(&self) -> &ArchiveEntry {
        &self.core().entry
    }

    /// Accept only the loader's own name or the main sentinel.
    fn validate_identity(&self, name: &str) -> Result<()> {
        let expected = self.real_name();
        if name == expected || name == self.mount().layout().main_sentinel {
            Ok(())
        } else {
            Err(ImportError::NameMismatch {
                expected: expected.to_string(),
                actual: name.to_string(),
            })
        }
    }

    fn is_package(&self, name: &str) -> Result<bool> {
        self.validate_identity(name)?;
        Ok(self.is_package_entry())
    }

    fn is_package_entry(&self) -> bool {
        let marker = format!("{}.", self.mount().layout().package_marker);
        self.entry()
            .name
            .rsplit('/')
            .next()
            .is_some_and(|base| base.starts_with(&marker))
    }

    /// Where the artifact lives (or would live) in the extraction cache.
    fn canonical_filename(&self, name: &str) -> Result<PathBuf> {
        self.validate_identity(name)?;
        Ok(self.artifact_path())
    }

    fn artifact_path(&self) -> PathBuf {
        output_path(self.mount().extract_root(), &self.entry().name)
    }

    /// Read a resource by its canonical path: from disk if it has been extracted,
    /// otherwise straight from the archive.
    fn get_data(&self, path: &Path) -> Result<Vec<u8>> {
        if path.is_file() {
            return Ok(fs::read(path)?);
        }
        let mount = self.mount();
        let name = mount
            .archive_path_of(path)
            .ok_or_else(|| ImportError::EntryNotFound {
                archive: mount.archive().path().to_path_buf(),
                name: path.display().to_string(),
            })?;
        mount.archive().read_path(&name)
    }

    /// Load the module, optionally under a different name than it was resolved for.
    ///
    /// A failed first-time load leaves no registry entry behind; a failed reload keeps
    /// the previous one. On success the registry's current entry is returned, which is
    /// not necessarily the module this loader created.
    fn load(&self, ctx: &ImportContext, name: &str, load_as: Option<&str>) -> Result<Arc<Module>> {
        self.validate_identity(name)?;
        let mod_name = load_as.unwrap_or(name);
        self.check_rename(mod_name)?;

        let registry = ctx.registry();
        let is_reload = registry.contains(mod_name);
        debug!(
            module = %mod_name,
            kind = %self.kind(),
            entry = %self.entry().name,
            reload = is_reload,
            "loading module"
        );

        if let Err(e) = self.exec_load(ctx, mod_name) {
            if !is_reload {
                registry.remove(mod_name);
            }
            return Err(e);
        }

        registry
            .get(mod_name)
            .ok_or_else(|| ImportError::ModuleNotFound(mod_name.to_string()))
    }

    /// Stamp the identity attributes of a freshly created module.
    fn set_attrs(&self, module: &Module, mod_name: &str) {
        let is_package = self.is_package_entry();
        let file = self.artifact_path();
        let path = is_package.then(|| self.mount().package_path_for(self.real_name()));
        let identity = LoaderIdentity {
            kind: self.kind(),
            archive: self.mount().archive().path().to_path_buf(),
            entry: self.entry().name.clone(),
        };

        module.update_attrs(|attrs| {
            attrs.name = mod_name.to_string();
            attrs.file = Some(file);
            attrs.package = if is_package {
                Some(mod_name.to_string())
            } else {
                mod_name.rsplit_once('.').map(|(parent, _)| parent.to_string())
            };
            attrs.path = path;
            attrs.loader = Some(identity);
        });
    }
}

/// A loader of either kind
#[derive(Debug, Clone)]
pub enum Loader {
    Source(SourceLoader),
    Native(NativeLoader),
}

impl Loader {
    /// Build the loader registered for `kind`.
    pub fn new(kind: LoaderKind, core: LoaderCore) -> Self {
        match kind {
            LoaderKind::Source => Loader::Source(SourceLoader::new(core)),
            LoaderKind::Native => Loader::Native(NativeLoader::new(core)),
        }
    }

    fn inner(&self) -> &dyn ModuleLoader {
        match self {
            Loader::Source(loader) => loader,
            Loader::Native(loader) => loader,
        }
    }
}

impl ModuleLoader for Loader {
    fn core(&self) -> &LoaderCore {
        self.inner().core()
    }

    fn kind(&self) -> LoaderKind {
        self.inner().kind()
    }

    fn exec_load(&self, ctx: &ImportContext, mod_name: &str) -> Result<()> {
        self.inner().exec_load(ctx, mod_name)
    }

    fn check_rename(&self, load_name: &str) -> Result<()> {
        self.inner().check_rename(load_name)
    }
}
