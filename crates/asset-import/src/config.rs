//! Mount configuration
//!
//! The configuration is produced by the application's startup code and consumed as-is:
//! which archives are mounted, in what order, and where they are extracted. Deciding
//! whether a cache must be wiped (the per-mount `hash`) stays with the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while reading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level import configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportConfig {
    /// Directory holding the physical archives
    pub asset_root: PathBuf,

    /// Root of the extraction cache. Search-path entries for archives live under here:
    /// `<cache_root>/<archive>` maps to `<asset_root>/<archive>`.
    pub cache_root: PathBuf,

    /// Archives to mount, in search-path order
    #[serde(default)]
    pub mounts: Vec<MountConfig>,

    /// Fully-qualified package names whose whole subtree is extracted when found
    #[serde(default)]
    pub extract_packages: BTreeSet<String>,

    /// ABI tags used to pair an archive with its companions
    #[serde(default = "default_abis")]
    pub abis: Vec<String>,

    /// Naming conventions inside archives
    #[serde(default)]
    pub layout: Layout,
}

/// One mounted archive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MountConfig {
    /// Archive path relative to `asset_root`
    pub archive: String,

    /// Content hash of the archive, for callers that invalidate caches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// File naming conventions used inside archives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Layout {
    /// Suffix of source modules
    pub source_suffix: String,

    /// Suffix of native extension modules and libraries
    pub native_suffix: String,

    /// Suffix of top-level autorun files
    pub autorun_suffix: String,

    /// Suffix of archive files, used to recognize companion archives
    pub archive_suffix: String,

    /// Base name of the file that marks a directory as a package
    pub package_marker: String,

    /// Directory inside archives holding shared libraries, keyed by logical name
    pub native_lib_dir: String,

    /// Name every loader accepts in addition to its own
    pub main_sentinel: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            source_suffix: ".py".to_string(),
            native_suffix: ".so".to_string(),
            autorun_suffix: ".pth".to_string(),
            archive_suffix: ".zip".to_string(),
            package_marker: "__init__".to_string(),
            native_lib_dir: "_native/lib".to_string(),
            main_sentinel: "__main__".to_string(),
        }
    }
}

/// Default ABI list: the architecture-independent tag plus the host's tag.
pub fn default_abis() -> Vec<String> {
    vec!["common".to_string(), host_abi().to_string()]
}

/// ABI tag of the running process.
pub fn host_abi() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64-v8a",
        "arm" => "armeabi-v7a",
        "x86" => "x86",
        "x86_64" => "x86_64",
        other => other,
    }
}

impl ImportConfig {
    /// Create a configuration with no mounts and default conventions.
    pub fn new(asset_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: asset_root.into(),
            cache_root: cache_root.into(),
            mounts: Vec::new(),
            extract_packages: BTreeSet::new(),
            abis: default_abis(),
            layout: Layout::default(),
        }
    }

    /// Parse a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: ImportConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "cache_root cannot be empty".to_string(),
            ));
        }

        for mount in &self.mounts {
            if !is_relative_archive_path(&mount.archive) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid archive path: '{}'. Must be a relative path inside asset_root",
                    mount.archive
                )));
            }
        }

        let layout = &self.layout;
        for (field, suffix) in [
            ("source_suffix", &layout.source_suffix),
            ("native_suffix", &layout.native_suffix),
            ("autorun_suffix", &layout.autorun_suffix),
            ("archive_suffix", &layout.archive_suffix),
        ] {
            if !suffix.starts_with('.') || suffix.len() < 2 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must start with '.', got '{}'",
                    field, suffix
                )));
            }
        }
        if layout.source_suffix == layout.native_suffix {
            return Err(ConfigError::ValidationError(
                "source_suffix and native_suffix must differ".to_string(),
            ));
        }
        if layout.package_marker.is_empty() || layout.package_marker.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "Invalid package_marker: '{}'",
                layout.package_marker
            )));
        }

        Ok(())
    }

    /// Extraction root of a configured archive, which is also its search-path entry.
    pub fn mount_entry(&self, mount: &MountConfig) -> PathBuf {
        self.cache_root.join(&mount.archive)
    }
}

fn is_relative_archive_path(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
