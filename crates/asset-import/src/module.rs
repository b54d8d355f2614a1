//! Modules and the shared module registry

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::loader::LoaderKind;
use crate::native::library::Library;

/// Which loader produced a module, and from where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderIdentity {
    pub kind: LoaderKind,
    /// Physical archive the module came from
    pub archive: PathBuf,
    /// Entry path inside the archive
    pub entry: String,
}

/// Identity attributes of a module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleAttrs {
    /// Fully-qualified name
    pub name: String,
    /// Canonical filename of the artifact
    pub file: Option<PathBuf>,
    /// Package the module belongs to (the module itself for packages)
    pub package: Option<String>,
    /// Search locations for submodules; `Some` only for packages
    pub path: Option<Vec<PathBuf>>,
    /// Loader that produced the module; `None` for namespace packages
    pub loader: Option<LoaderIdentity>,
}

/// A module as seen by the registry
///
/// The namespace is a plain name → value map that the interpreter fills while
/// executing the module body.
#[derive(Debug)]
pub struct Module {
    attrs: RwLock<ModuleAttrs>,
    namespace: RwLock<BTreeMap<String, String>>,
    library: Option<Arc<Library>>,
}

impl Module {
    /// Create an empty module
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            attrs: RwLock::new(ModuleAttrs {
                name: name.to_string(),
                ..ModuleAttrs::default()
            }),
            namespace: RwLock::new(BTreeMap::new()),
            library: None,
        })
    }

    /// Create a module backed by a dynamically loaded library
    pub fn with_library(name: &str, library: Arc<Library>) -> Arc<Self> {
        Arc::new(Self {
            attrs: RwLock::new(ModuleAttrs {
                name: name.to_string(),
                ..ModuleAttrs::default()
            }),
            namespace: RwLock::new(BTreeMap::new()),
            library: Some(library),
        })
    }

    /// Create a namespace package spanning `path`
    pub fn namespace_package(name: &str, path: Vec<PathBuf>) -> Arc<Self> {
        let module = Self::new(name);
        module.update_attrs(|attrs| {
            attrs.package = Some(name.to_string());
            attrs.path = Some(path);
        });
        module
    }

    pub fn name(&self) -> String {
        self.attrs.read().name.clone()
    }

    /// Snapshot of the identity attributes
    pub fn attrs(&self) -> ModuleAttrs {
        self.attrs.read().clone()
    }

    pub fn update_attrs(&self, f: impl FnOnce(&mut ModuleAttrs)) {
        f(&mut self.attrs.write());
    }

    pub fn is_package(&self) -> bool {
        self.attrs.read().path.is_some()
    }

    /// Submodule search path, if this is a package
    pub fn path(&self) -> Option<Vec<PathBuf>> {
        self.attrs.read().path.clone()
    }

    pub fn library(&self) -> Option<&Arc<Library>> {
        self.library.as_ref()
    }

    /// Bind a name in the module namespace
    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.namespace.write().insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.namespace.read().get(key).cloned()
    }

    pub fn namespace(&self) -> BTreeMap<String, String> {
        self.namespace.read().clone()
    }
}

/// Shared name → module map
///
/// Loaders reserve a name here before executing the module body, so a load that
/// re-enters resolution of its own name sees the in-progress module.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<Module>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.read().contains_key(name)
    }

    /// Insert or replace a module, returning the previous one
    pub fn insert(&self, name: &str, module: Arc<Module>) -> Option<Arc<Module>> {
        self.modules.write().insert(name.to_string(), module)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.write().remove(name)
    }

    /// Sorted names of all registered modules
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}
