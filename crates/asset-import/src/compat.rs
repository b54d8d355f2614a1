//! Legacy find/load entry points
//!
//! Older callers locate a module by its undotted name on a list of path entries, then
//! hand the returned pathname back to load it. Pathnames of modules found in archives
//! carry [`PATHNAME_PREFIX`] so the load call can recognize them; `None` from either
//! function tells the caller to fall back to its own implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::ImportContext;
use crate::error::{ImportError, Result};
use crate::loader::{Loader, LoaderKind, ModuleLoader};
use crate::module::Module;
use crate::mount::Mount;

/// Marks pathnames produced by [`find_module`]
pub const PATHNAME_PREFIX: &str = "<asset>/";

/// Result of [`find_module`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyModuleInfo {
    /// Opaque pathname to pass to [`load_module`]
    pub pathname: String,
    pub is_package: bool,
    pub kind: LoaderKind,
}

/// Find `base_name` (no dots) on `path`, or on the search path if `path` is `None`.
pub fn find_module(
    ctx: &ImportContext,
    base_name: &str,
    path: Option<&[PathBuf]>,
) -> Result<Option<LegacyModuleInfo>> {
    let entries = match path {
        Some(entries) => entries.to_vec(),
        None => ctx.search_path(),
    };

    for entry in entries {
        let Some(mount) = ctx.importer(&entry)? else {
            continue;
        };
        let Some(loader) = resolve(&mount, base_name)? else {
            continue;
        };
        return Ok(Some(LegacyModuleInfo {
            pathname: format!("{}{}", PATHNAME_PREFIX, entry.join(base_name).display()),
            is_package: loader.is_package_entry(),
            kind: loader.kind(),
        }));
    }
    Ok(None)
}

/// Load the module behind a pathname from [`find_module`] as `load_name`.
///
/// Returns `Ok(None)` if `pathname` did not come from [`find_module`].
pub fn load_module(
    ctx: &ImportContext,
    load_name: &str,
    pathname: &str,
) -> Result<Option<Arc<Module>>> {
    let Some(location) = pathname.strip_prefix(PATHNAME_PREFIX) else {
        return Ok(None);
    };
    let location = Path::new(location);
    let (Some(entry), Some(base_name)) = (
        location.parent(),
        location.file_name().and_then(|n| n.to_str()),
    ) else {
        return Err(ImportError::ModuleNotFound(pathname.to_string()));
    };

    let mount = ctx
        .importer(entry)?
        .ok_or_else(|| ImportError::NotAnArchive(entry.to_path_buf()))?;
    let real_name = real_name(&mount, base_name);
    let loader =
        resolve(&mount, base_name)?.ok_or_else(|| ImportError::ModuleNotFound(real_name.clone()))?;

    let load_as = (load_name != real_name).then_some(load_name);
    loader.load(ctx, &real_name, load_as).map(Some)
}

/// Dotted name of `base_name` under the mount's prefix.
fn real_name(mount: &Mount, base_name: &str) -> String {
    if mount.prefix().is_empty() {
        base_name.to_string()
    } else {
        format!("{}.{}", mount.prefix().replace('/', "."), base_name)
    }
}

fn resolve(mount: &Arc<Mount>, base_name: &str) -> Result<Option<Loader>> {
    mount.find(&real_name(mount, base_name))
}
