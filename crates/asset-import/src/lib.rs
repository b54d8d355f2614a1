//! Archive-backed module loading
//!
//! This crate lets an embedded interpreter import modules straight out of ZIP archives
//! shipped with an application, including:
//! - Mounting archives (or sub-paths inside them) as search-path entries
//! - Resolving dotted module names to source or native loaders
//! - Extracting native artifacts to a cache, with size/mtime staleness checks
//! - Loading the native libraries an extension depends on, dependencies first
//! - Running per-archive autorun files
//! - Legacy find/load entry points

pub mod archive;
pub mod autorun;
pub mod compat;
pub mod config;
pub mod context;
pub mod error;
pub mod loader;
pub mod module;
pub mod mount;
pub mod native;

pub use archive::{ArchiveCache, ArchiveEntry, ArchiveHandle};
pub use autorun::AutorunError;
pub use config::{ConfigError, ImportConfig, Layout, MountConfig};
pub use context::{ImportContext, ImportContextBuilder, Interpreter};
pub use error::{ImportError, Result};
pub use loader::{Loader, LoaderKind, ModuleLoader, NativeLoader, SourceLoader};
pub use module::{LoaderIdentity, Module, ModuleAttrs, ModuleRegistry};
pub use mount::{ModuleIter, Mount};
pub use native::elf::{needed_libraries, ElfError};
pub use native::library::{DynamicLinker, Library, LoadError, SystemLinker, Visibility};
pub use native::NativeRegistry;
