//! Native extension loader

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{LoaderCore, LoaderKind, ModuleLoader};
use crate::context::ImportContext;
use crate::error::{ImportError, Result};
use crate::module::Module;
use crate::native::library::Visibility;

/// Extracts a compiled extension and loads it with the dynamic linker
#[derive(Debug, Clone)]
pub struct NativeLoader {
    core: LoaderCore,
}

impl NativeLoader {
    pub fn new(core: LoaderCore) -> Self {
        Self { core }
    }

    /// Extract the artifact and return the uniquely named alias to load it through.
    ///
    /// Some dynamic linkers hand back an already loaded library when asked for another
    /// one with the same file name, regardless of directory.
    fn extract(&self, mod_name: &str) -> Result<PathBuf> {
        let extracted = self.core.mount.extract_if_changed(&self.core.entry)?;
        let alias_name = format!("{}{}", mod_name, self.core.mount.layout().native_suffix);
        let alias = match extracted.parent() {
            Some(dir) => dir.join(alias_name),
            None => PathBuf::from(alias_name),
        };
        if alias != extracted {
            refresh_alias(&extracted, &alias).map_err(|e| ImportError::extraction(&alias, e))?;
        }
        Ok(alias)
    }
}

impl ModuleLoader for NativeLoader {
    fn core(&self) -> &LoaderCore {
        &self.core
    }

    fn kind(&self) -> LoaderKind {
        LoaderKind::Native
    }

    fn check_rename(&self, load_name: &str) -> Result<()> {
        if load_name != self.core.real_name {
            return Err(ImportError::UnsupportedRename {
                loader: "NativeLoader",
                real_name: self.core.real_name.clone(),
                load_name: load_name.to_string(),
            });
        }
        Ok(())
    }

    fn exec_load(&self, ctx: &ImportContext, mod_name: &str) -> Result<()> {
        let path = self.extract(mod_name)?;
        ctx.natives().load_needed(ctx, &path)?;

        let library = Arc::new(ctx.linker().open(&path, Visibility::Local)?);
        let module = Module::with_library(mod_name, Arc::clone(&library));
        ctx.interpreter().init_native(ctx, &module, &library)?;

        ctx.registry().insert(mod_name, Arc::clone(&module));
        self.set_attrs(&module, mod_name);
        Ok(())
    }
}

#[cfg(unix)]
fn refresh_alias(target: &Path, alias: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(alias).is_ok() {
        if fs::read_link(alias).is_ok_and(|current| current == target) {
            return Ok(());
        }
        fs::remove_file(alias)?;
    }
    std::os::unix::fs::symlink(target, alias)
}

#[cfg(not(unix))]
fn refresh_alias(target: &Path, alias: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(alias).is_ok() {
        fs::remove_file(alias)?;
    }
    fs::copy(target, alias).map(|_| ())
}
