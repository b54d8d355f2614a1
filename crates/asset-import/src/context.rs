//! Import context
//!
//! [`ImportContext`] owns everything that is process-wide in an embedded interpreter: the
//! module registry, the search path, the cache of mounts per search-path entry, the
//! shared archive handles and the registry of loaded native libraries. Executing code and
//! loading libraries are delegated to the injected [`Interpreter`] and
//! [`DynamicLinker`].

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::archive::ArchiveCache;
use crate::autorun::{self, AutorunError};
use crate::config::ImportConfig;
use crate::error::{ImportError, Result};
use crate::loader::ModuleLoader;
use crate::module::{Module, ModuleRegistry};
use crate::mount::Mount;
use crate::native::library::{DynamicLinker, Library, SystemLinker};
use crate::native::NativeRegistry;

/// The interpreter that gives modules their contents
pub trait Interpreter: Send + Sync {
    /// Compile and execute `source` into `module`'s namespace.
    fn exec_source(
        &self,
        ctx: &ImportContext,
        module: &Arc<Module>,
        source: &str,
        filename: &Path,
    ) -> Result<()>;

    /// Initialize a native module from its loaded library.
    fn init_native(
        &self,
        _ctx: &ImportContext,
        _module: &Arc<Module>,
        _library: &Arc<Library>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Builder for [`ImportContext`]
pub struct ImportContextBuilder {
    config: ImportConfig,
    interpreter: Arc<dyn Interpreter>,
    registry: Option<Arc<ModuleRegistry>>,
    linker: Option<Arc<dyn DynamicLinker>>,
}

impl ImportContextBuilder {
    /// Share an existing module registry
    pub fn registry(mut self, registry: Arc<ModuleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Load libraries through `linker` instead of the system linker
    pub fn linker(mut self, linker: Arc<dyn DynamicLinker>) -> Self {
        self.linker = Some(linker);
        self
    }

    pub fn build(self) -> ImportContext {
        ImportContext {
            config: Arc::new(self.config),
            registry: self.registry.unwrap_or_default(),
            interpreter: self.interpreter,
            linker: self.linker.unwrap_or_else(|| Arc::new(SystemLinker)),
            archives: ArchiveCache::new(),
            natives: NativeRegistry::new(),
            search_path: RwLock::new(Vec::new()),
            importers: Mutex::new(HashMap::new()),
            import_lock: ReentrantMutex::new(()),
        }
    }
}

/// Process-scoped owner of the import machinery
pub struct ImportContext {
    config: Arc<ImportConfig>,
    registry: Arc<ModuleRegistry>,
    interpreter: Arc<dyn Interpreter>,
    linker: Arc<dyn DynamicLinker>,
    archives: ArchiveCache,
    natives: NativeRegistry,
    search_path: RwLock<Vec<PathBuf>>,
    /// Mount per search-path entry; `None` for entries no archive backs
    importers: Mutex<HashMap<PathBuf, Option<Arc<Mount>>>>,
    import_lock: ReentrantMutex<()>,
}

impl std::fmt::Debug for ImportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportContext")
            .field("config", &self.config)
            .field("search_path", &*self.search_path.read())
            .field("modules", &self.registry.len())
            .field("archives", &self.archives.len())
            .field("natives", &self.natives.len())
            .finish()
    }
}

impl ImportContext {
    pub fn builder(config: ImportConfig, interpreter: Arc<dyn Interpreter>) -> ImportContextBuilder {
        ImportContextBuilder {
            config,
            interpreter,
            registry: None,
            linker: None,
        }
    }

    pub fn config(&self) -> &Arc<ImportConfig> {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn interpreter(&self) -> &dyn Interpreter {
        self.interpreter.as_ref()
    }

    pub fn linker(&self) -> &dyn DynamicLinker {
        self.linker.as_ref()
    }

    pub fn archives(&self) -> &ArchiveCache {
        &self.archives
    }

    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    // ========================================================================
    // Search path
    // ========================================================================

    /// Snapshot of the search path
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.search_path.read().clone()
    }

    pub fn set_search_path(&self, entries: Vec<PathBuf>) {
        *self.search_path.write() = entries;
    }

    /// Insert an entry at `index`, clamped to the end of the path
    pub fn insert_path(&self, index: usize, entry: impl Into<PathBuf>) {
        let mut path = self.search_path.write();
        let index = index.min(path.len());
        path.insert(index, entry.into());
    }

    pub fn push_path(&self, entry: impl Into<PathBuf>) {
        self.search_path.write().push(entry.into());
    }

    /// Mount serving `entry`, created on first use.
    ///
    /// Returns `Ok(None)` for entries no archive backs, which are remembered and skipped
    /// from then on. Other failures are returned and not remembered.
    pub fn importer(&self, entry: &Path) -> Result<Option<Arc<Mount>>> {
        let mut importers = self.importers.lock();
        if let Some(cached) = importers.get(entry) {
            return Ok(cached.clone());
        }

        match Mount::open(entry, &self.config, &self.archives) {
            Ok(mount) => {
                let mount = Arc::new(mount);
                importers.insert(entry.to_path_buf(), Some(Arc::clone(&mount)));
                Ok(Some(mount))
            }
            Err(e) if e.is_not_applicable() => {
                debug!(entry = %entry.display(), "search path entry skipped: {}", e);
                importers.insert(entry.to_path_buf(), None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Mounts for the current search path, in order
    pub fn active_mounts(&self) -> Result<Vec<Arc<Mount>>> {
        let mut mounts = Vec::new();
        for entry in self.search_path() {
            if let Some(mount) = self.importer(&entry)? {
                mounts.push(mount);
            }
        }
        Ok(mounts)
    }

    // ========================================================================
    // Importing
    // ========================================================================

    /// Import a dotted module name, importing its parent packages first.
    ///
    /// A name already in the registry is returned as-is, including modules whose load
    /// is still in progress on this thread.
    pub fn import_module(&self, name: &str) -> Result<Arc<Module>> {
        if name.split('.').any(str::is_empty) {
            return Err(ImportError::ModuleNotFound(name.to_string()));
        }
        let _guard = self.import_lock.lock();
        if let Some(module) = self.registry.get(name) {
            return Ok(module);
        }

        let entries = match name.rsplit_once('.') {
            Some((parent, _)) => {
                let parent = self.import_module(parent)?;
                // Importing the parent may have imported us as well.
                if let Some(module) = self.registry.get(name) {
                    return Ok(module);
                }
                parent
                    .path()
                    .ok_or_else(|| ImportError::ModuleNotFound(name.to_string()))?
            }
            None => self.search_path(),
        };

        let mut portions = Vec::new();
        for entry in entries {
            let Some(mount) = self.importer(&entry)? else {
                continue;
            };
            let (loader, path) = mount.find_loader(name)?;
            if let Some(loader) = loader {
                return loader.load(self, name, None);
            }
            portions.extend(path);
        }

        if portions.is_empty() {
            return Err(ImportError::ModuleNotFound(name.to_string()));
        }
        debug!(module = %name, portions = portions.len(), "namespace package");
        let module = Module::namespace_package(name, portions);
        self.registry.insert(name, Arc::clone(&module));
        Ok(module)
    }

    /// Put every configured archive at the front of the search path, in configured
    /// order, then run the autorun files of each.
    ///
    /// Autorun failures do not abort mounting; they are logged and returned.
    pub fn mount_all(&self) -> Result<Vec<AutorunError>> {
        let entries: Vec<PathBuf> = self
            .config
            .mounts
            .iter()
            .map(|m| self.config.mount_entry(m))
            .collect();

        {
            let mut path = self.search_path.write();
            path.retain(|p| !entries.contains(p));
            for (i, entry) in entries.iter().enumerate() {
                path.insert(i, entry.clone());
            }
        }

        let mut mounts = Vec::with_capacity(entries.len());
        for entry in &entries {
            match self.importer(entry)? {
                Some(mount) => mounts.push(mount),
                None => {
                    warn!(entry = %entry.display(), "configured archive is not mountable");
                    return Err(ImportError::NotAnArchive(entry.clone()));
                }
            }
        }

        // Autorun lines may import from any mount, so all are registered first.
        let mut errors = Vec::new();
        for mount in &mounts {
            errors.extend(autorun::run_autorun(self, mount));
        }
        Ok(errors)
    }
}
