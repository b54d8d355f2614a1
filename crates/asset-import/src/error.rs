//! Import error types.

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::native::elf::ElfError;
use crate::native::library::LoadError;

/// Errors that can occur while mounting archives, resolving names, or loading modules.
///
/// Only [`ImportError::NotAnArchive`] is a "does not apply" condition: the search-path
/// machinery skips the entry and moves on. Everything else aborts the operation that
/// triggered it.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The search-path entry is not backed by any archive
    #[error("not an asset path: '{}'", .0.display())]
    NotAnArchive(PathBuf),

    /// The archive exists but could not be read or indexed
    #[error("archive {} is corrupt: {reason}", path.display())]
    ArchiveCorrupt { path: PathBuf, reason: String },

    /// A companion archive implied by the naming convention does not exist
    #[error("companion archive not found: {}", .0.display())]
    CompanionMissing(PathBuf),

    /// Lookup of an entry that is not in the archive
    #[error("there is no item named '{name}' in the archive {}", archive.display())]
    EntryNotFound { archive: PathBuf, name: String },

    /// A compiled artifact without dynamic-linkage metadata
    #[error("{} has no .dynamic section", .0.display())]
    MissingDynamicSection(PathBuf),

    /// A compiled artifact that is not a readable ELF image
    #[error("cannot read {}: {source}", path.display())]
    Elf {
        path: PathBuf,
        #[source]
        source: ElfError,
    },

    /// A loader was asked to act on a module it was not created for
    #[error("loader mismatch: actual='{actual}', expected='{expected}'")]
    NameMismatch { expected: String, actual: String },

    /// Writing an artifact to the extraction cache failed
    #[error("failed to extract {}: {source}", path.display())]
    ExtractionIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rename-on-load requested from a loader that cannot honour it
    #[error("{loader} does not support loading module '{real_name}' under a different name '{load_name}'")]
    UnsupportedRename {
        loader: &'static str,
        real_name: String,
        load_name: String,
    },

    /// No mount provides the module
    #[error("No module named '{0}'")]
    ModuleNotFound(String),

    /// Source bytes could not be decoded to text
    #[error("cannot decode source {}: {reason}", path.display())]
    SourceDecode { path: PathBuf, reason: String },

    /// The interpreter failed while executing or initializing a module
    #[error("error executing module '{module}': {message}")]
    Execution { module: String, message: String },

    /// The dynamic linker refused a library
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    /// True if this error means "this hook does not apply" rather than "this hook is broken".
    pub fn is_not_applicable(&self) -> bool {
        matches!(self, ImportError::NotAnArchive(_))
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ImportError::ArchiveCorrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImportError::ExtractionIo {
            path: path.into(),
            source,
        }
    }
}

/// Shorthand used throughout the crate.
pub type Result<T, E = ImportError> = std::result::Result<T, E>;
