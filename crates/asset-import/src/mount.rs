//! Archive mounts
//!
//! A [`Mount`] serves one search-path entry. The entry names a location under the
//! configured cache root; the archive backing it sits at the same relative path under the
//! asset root. An entry may also point inside an archive (`<cache_root>/app.zip/pkg`), in
//! which case trailing components are stripped until an archive is found and the rest
//! becomes the mount's prefix.
//!
//! Archives named `<base>-<abi>.zip` are paired with the archives for the other
//! configured ABIs. Companions never take part in name resolution, but they extend the
//! package path and are extracted alongside the primary archive for eager packages.

use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::archive::{ArchiveCache, ArchiveHandle};
use crate::config::{ConfigError, ImportConfig, Layout};
use crate::error::{ImportError, Result};
use crate::loader::{module_name_of, Loader, LoaderCore, ModuleLoader, LOADER_PRIORITY};

/// One search-path entry backed by an archive
#[derive(Debug)]
pub struct Mount {
    /// The search-path entry as given
    path: PathBuf,
    /// Cache directory of the primary archive
    extract_root: PathBuf,
    /// Location of the entry inside the archive, `/`-separated, no trailing slash
    prefix: String,
    archive: Arc<ArchiveHandle>,
    companions: Vec<Arc<ArchiveHandle>>,
    package_path: Vec<PathBuf>,
    config: Arc<ImportConfig>,
}

impl Mount {
    /// Mount the search-path entry `path`.
    ///
    /// Fails with [`ImportError::NotAnArchive`] if no ancestor of `path` is backed by an
    /// archive. Any other error means the archive is there but unusable.
    pub fn open(path: &Path, config: &Arc<ImportConfig>, archives: &ArchiveCache) -> Result<Self> {
        let mut extract_root = path.to_path_buf();
        let mut prefix_parts: Vec<String> = Vec::new();

        let archive = loop {
            let physical = asset_location(config, &extract_root)
                .ok_or_else(|| ImportError::NotAnArchive(path.to_path_buf()))?;
            if physical.is_file() {
                break archives.get_or_open(&physical, &config.layout)?;
            }

            let name = extract_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ImportError::NotAnArchive(path.to_path_buf()))?;
            prefix_parts.insert(0, name);
            extract_root.pop();
        };
        let prefix = prefix_parts.join("/");

        fs::create_dir_all(&extract_root)
            .map_err(|e| ImportError::extraction(&extract_root, e))?;

        let mut package_path = vec![path.to_path_buf()];
        let mut companions = Vec::new();
        for companion_root in companion_roots(config, &extract_root)? {
            let physical = asset_location(config, &companion_root)
                .filter(|p| p.is_file())
                .ok_or_else(|| ImportError::CompanionMissing(companion_root.clone()))?;
            companions.push(archives.get_or_open(&physical, &config.layout)?);
            package_path.push(join_prefix(&companion_root, &prefix));
        }

        debug!(
            entry = %path.display(),
            archive = %archive.path().display(),
            prefix = %prefix,
            companions = companions.len(),
            "mounted"
        );

        Ok(Self {
            path: path.to_path_buf(),
            extract_root,
            prefix,
            archive,
            companions,
            package_path,
            config: Arc::clone(config),
        })
    }

    /// Find a loader for `name`. Only the final dotted component is looked up.
    ///
    /// Packages win over plain modules, and source wins over native within each form.
    pub fn find(self: &Arc<Self>, name: &str) -> Result<Option<Loader>> {
        let stem = self.stem(name);
        let layout = self.layout();

        for package_form in [true, false] {
            for kind in LOADER_PRIORITY {
                let entry_name = if package_form {
                    format!("{}/{}{}", stem, layout.package_marker, kind.suffix(layout))
                } else {
                    format!("{}{}", stem, kind.suffix(layout))
                };
                let Some(entry) = self.archive.entry(&entry_name) else {
                    continue;
                };

                if package_form && self.config.extract_packages.contains(name) {
                    self.extract_package(&stem)?;
                }
                debug!(module = %name, entry = %entry_name, kind = %kind, "found");
                return Ok(Some(Loader::new(
                    kind,
                    LoaderCore::new(Arc::clone(self), name, entry.clone()),
                )));
            }
        }
        Ok(None)
    }

    /// Like [`Mount::find`], also returning the package path portions this mount
    /// contributes. A directory without a loader contributes namespace portions.
    pub fn find_loader(self: &Arc<Self>, name: &str) -> Result<(Option<Loader>, Vec<PathBuf>)> {
        match self.find(name)? {
            Some(loader) => {
                let path = if loader.is_package_entry() {
                    self.package_path_for(name)
                } else {
                    Vec::new()
                };
                Ok((Some(loader), path))
            }
            None if self.archive.is_dir(&self.stem(name)) => Ok((None, self.package_path_for(name))),
            None => Ok((None, Vec::new())),
        }
    }

    /// Package path of `name`: every package-path entry joined with its final component.
    pub fn package_path_for(&self, name: &str) -> Vec<PathBuf> {
        let base = base_name(name);
        self.package_path.iter().map(|entry| entry.join(base)).collect()
    }

    /// Lazily list the modules directly under this mount as `(prefix + name, is_package)`.
    pub fn iter_modules(self: &Arc<Self>, prefix: &str) -> ModuleIter {
        let children = self.archive.list_dir(&self.prefix).unwrap_or_default();
        ModuleIter {
            mount: Arc::clone(self),
            prefix: prefix.to_string(),
            children,
            pos: 0,
        }
    }

    /// Extract every file below `package_dir` from the primary and companion archives.
    pub fn extract_package(&self, package_dir: &str) -> Result<()> {
        let dir_prefix = format!("{}/", package_dir.trim_end_matches('/'));
        let mut count = 0usize;
        for archive in std::iter::once(&self.archive).chain(self.companions.iter()) {
            let mut entries: Vec<_> = archive
                .entries()
                .filter(|e| e.name.starts_with(&dir_prefix) && !e.is_dir())
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in entries {
                archive.extract_if_changed(entry, &self.extract_root)?;
                count += 1;
            }
        }
        debug!(package = %package_dir, files = count, "extracted package");
        Ok(())
    }

    /// Extract an entry of the primary archive into this mount's cache directory.
    pub fn extract_if_changed(&self, entry: &crate::archive::ArchiveEntry) -> Result<PathBuf> {
        self.archive.extract_if_changed(entry, &self.extract_root)
    }

    /// Archive path of a file under the extraction root.
    pub fn archive_path_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.extract_root).ok()?;
        let parts: Option<Vec<&str>> = rel
            .components()
            .map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        parts.filter(|p| !p.is_empty()).map(|p| p.join("/"))
    }

    /// Archive path of `name`'s final component under this mount's prefix.
    fn stem(&self, name: &str) -> String {
        join_rel(&self.prefix, base_name(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn extract_root(&self) -> &Path {
        &self.extract_root
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn archive(&self) -> &Arc<ArchiveHandle> {
        &self.archive
    }

    pub fn companions(&self) -> &[Arc<ArchiveHandle>] {
        &self.companions
    }

    pub fn package_path(&self) -> &[PathBuf] {
        &self.package_path
    }

    pub fn config(&self) -> &Arc<ImportConfig> {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.config.layout
    }
}

/// Lazy listing produced by [`Mount::iter_modules`]
///
/// Cloning gives an independent iterator starting from the same position.
#[derive(Debug, Clone)]
pub struct ModuleIter {
    mount: Arc<Mount>,
    prefix: String,
    children: Vec<String>,
    pos: usize,
}

impl Iterator for ModuleIter {
    type Item = (String, bool);

    fn next(&mut self) -> Option<Self::Item> {
        let layout = self.mount.layout();
        let archive = &self.mount.archive;

        while let Some(child) = self.children.get(self.pos) {
            self.pos += 1;
            let path = join_rel(&self.mount.prefix, child);
            if let Some(listing) = archive.list_dir(&path) {
                let is_package = listing
                    .iter()
                    .any(|f| module_name_of(f, layout) == Some(layout.package_marker.as_str()));
                if is_package {
                    return Some((format!("{}{}", self.prefix, child), true));
                }
            } else if let Some(module) = module_name_of(child, layout) {
                if module != layout.package_marker {
                    return Some((format!("{}{}", self.prefix, module), false));
                }
            }
        }
        None
    }
}

/// Physical archive location for a candidate under the cache root.
fn asset_location(config: &ImportConfig, candidate: &Path) -> Option<PathBuf> {
    let rel = candidate.strip_prefix(&config.cache_root).ok()?;
    let mut components = rel.components().peekable();
    components.peek()?;
    if components.all(|c| matches!(c, Component::Normal(_))) {
        Some(config.asset_root.join(rel))
    } else {
        None
    }
}

/// Extraction roots of the companions of `extract_root`, if it follows the ABI naming
/// convention.
fn companion_roots(config: &ImportConfig, extract_root: &Path) -> Result<Vec<PathBuf>> {
    if config.abis.is_empty() {
        return Ok(Vec::new());
    }
    let abis: Vec<String> = config.abis.iter().map(|a| regex::escape(a)).collect();
    let pattern = format!(
        "^(.*)-({}){}$",
        abis.join("|"),
        regex::escape(&config.layout.archive_suffix)
    );
    let re = Regex::new(&pattern)
        .map_err(|e| ConfigError::ValidationError(format!("bad ABI list: {}", e)))?;

    let root = extract_root.to_string_lossy();
    let Some(base) = re.captures(&root).and_then(|c| c.get(1)) else {
        return Ok(Vec::new());
    };
    Ok(config
        .abis
        .iter()
        .map(|abi| PathBuf::from(format!("{}-{}{}", base.as_str(), abi, config.layout.archive_suffix)))
        .filter(|companion| companion != extract_root)
        .collect())
}

fn base_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn join_rel(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn join_prefix(root: &Path, prefix: &str) -> PathBuf {
    prefix.split('/').filter(|p| !p.is_empty()).fold(root.to_path_buf(), |path, part| path.join(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_location() {
        let config = ImportConfig::new("/assets", "/cache");
        assert_eq!(
            asset_location(&config, Path::new("/cache/app.zip")),
            Some(PathBuf::from("/assets/app.zip"))
        );
        assert_eq!(asset_location(&config, Path::new("/cache")), None);
        assert_eq!(asset_location(&config, Path::new("/elsewhere/app.zip")), None);
        assert_eq!(asset_location(&config, Path::new("/cache/../app.zip")), None);
    }

    #[test]
    fn test_companion_roots() {
        let mut config = ImportConfig::new("/assets", "/cache");
        config.abis = vec!["common".to_string(), "x86_64".to_string()];

        assert_eq!(
            companion_roots(&config, Path::new("/cache/requirements-common.zip")).unwrap(),
            vec![PathBuf::from("/cache/requirements-x86_64.zip")]
        );
        assert_eq!(
            companion_roots(&config, Path::new("/cache/requirements-x86_64.zip")).unwrap(),
            vec![PathBuf::from("/cache/requirements-common.zip")]
        );
        assert!(companion_roots(&config, Path::new("/cache/app.zip")).unwrap().is_empty());
        assert!(companion_roots(&config, Path::new("/cache/req-arm64-v8a.zip"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_name_helpers() {
        assert_eq!(base_name("a.b.c"), "c");
        assert_eq!(base_name("top"), "top");
        assert_eq!(join_rel("", "mod"), "mod");
        assert_eq!(join_rel("pkg/sub", "mod"), "pkg/sub/mod");
        assert_eq!(join_prefix(Path::new("/c/x.zip"), ""), PathBuf::from("/c/x.zip"));
        assert_eq!(join_prefix(Path::new("/c/x.zip"), "a/b"), PathBuf::from("/c/x.zip/a/b"));
    }
}
