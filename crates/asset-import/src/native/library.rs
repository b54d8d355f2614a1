//! Dynamic library loading
//!
//! [`Library`] is a handle to a loaded shared library. Handles are never closed: once a
//! library is loaded, other libraries may have resolved symbols against it, so it stays
//! mapped for the life of the process.
//!
//! The [`DynamicLinker`] trait is the seam between the loaders and the platform linker.
//! [`SystemLinker`] calls `dlopen`; hosts with their own loading rules, and tests, supply
//! their own implementation.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by a dynamic linker
#[derive(Debug, Error)]
pub enum LoadError {
    /// The linker refused to load the file
    #[error("cannot load library {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    /// A symbol lookup failed
    #[error("symbol '{symbol}' not found in {}: {reason}", library.display())]
    Symbol {
        symbol: String,
        library: PathBuf,
        reason: String,
    },

    /// The path cannot be handed to the platform linker
    #[error("library path not representable on this platform: {}", .0.display())]
    InvalidPath(PathBuf),

    /// Dynamic loading is not available on this platform
    #[error("dynamic loading is not supported on this platform: {}", .0.display())]
    Unsupported(PathBuf),
}

/// Symbol visibility of a loaded library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Symbols are only reachable through this handle
    Local,
    /// Symbols are available to libraries loaded afterwards
    Global,
}

/// Handle to a loaded shared library
pub struct Library {
    raw: Option<sys::RawHandle>,
    path: PathBuf,
}

impl Library {
    /// Load a shared library with the platform linker.
    ///
    /// On unix this is `dlopen(RTLD_NOW | RTLD_LOCAL)` or `dlopen(RTLD_NOW | RTLD_GLOBAL)`
    /// depending on `visibility`.
    pub fn open<P: AsRef<Path>>(path: P, visibility: Visibility) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let raw = sys::open(path, visibility)?;
        Ok(Library {
            raw: Some(raw),
            path: path.to_path_buf(),
        })
    }

    /// A handle that is not backed by the platform linker.
    ///
    /// Used by linkers that load code by other means; symbol lookup always fails.
    pub fn detached<P: Into<PathBuf>>(path: P) -> Self {
        Library {
            raw: None,
            path: path.into(),
        }
    }

    /// Address of `symbol`, reinterpreted as `T`.
    ///
    /// # Safety
    ///
    /// `T` must be a pointer-sized type matching the symbol's real type.
    pub unsafe fn get<T>(&self, symbol: &str) -> Result<T, LoadError> {
        let raw = self.raw.as_ref().ok_or_else(|| LoadError::Symbol {
            symbol: symbol.to_string(),
            library: self.path.clone(),
            reason: "library is not loaded by the platform linker".to_string(),
        })?;
        let address = sys::symbol(raw, symbol).map_err(|reason| LoadError::Symbol {
            symbol: symbol.to_string(),
            library: self.path.clone(),
            reason,
        })?;
        Ok(std::mem::transmute_copy(&address))
    }

    /// Path this library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle came from [`Library::detached`]
    pub fn is_detached(&self) -> bool {
        self.raw.is_none()
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("path", &self.path)
            .field("detached", &self.is_detached())
            .finish()
    }
}

/// Performs the actual dynamic load of a library file
pub trait DynamicLinker: Send + Sync {
    fn open(&self, path: &Path, visibility: Visibility) -> Result<Library, LoadError>;
}

/// The platform's own dynamic linker
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLinker;

impl DynamicLinker for SystemLinker {
    fn open(&self, path: &Path, visibility: Visibility) -> Result<Library, LoadError> {
        Library::open(path, visibility)
    }
}

#[cfg(unix)]
mod sys {
    use std::ffi::{CStr, CString};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use super::{LoadError, Visibility};

    pub struct RawHandle(*mut libc::c_void);

    // dlopen handles may be used from any thread.
    unsafe impl Send for RawHandle {}
    unsafe impl Sync for RawHandle {}

    pub fn open(path: &Path, visibility: Visibility) -> Result<RawHandle, LoadError> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| LoadError::InvalidPath(path.to_path_buf()))?;
        let mode = libc::RTLD_NOW
            | match visibility {
                Visibility::Local => libc::RTLD_LOCAL,
                Visibility::Global => libc::RTLD_GLOBAL,
            };

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), mode) };
        if handle.is_null() {
            return Err(LoadError::Open {
                path: path.to_path_buf(),
                reason: last_error(),
            });
        }
        Ok(RawHandle(handle))
    }

    pub unsafe fn symbol(raw: &RawHandle, name: &str) -> Result<*mut libc::c_void, String> {
        let c_name = CString::new(name).map_err(|e| e.to_string())?;
        libc::dlerror();
        let address = libc::dlsym(raw.0, c_name.as_ptr());
        if address.is_null() {
            return Err(last_error());
        }
        Ok(address)
    }

    fn last_error() -> String {
        let message = unsafe { libc::dlerror() };
        if message.is_null() {
            "unknown dynamic linker error".to_string()
        } else {
            unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::path::Path;

    use super::{LoadError, Visibility};

    pub struct RawHandle;

    pub fn open(path: &Path, _visibility: Visibility) -> Result<RawHandle, LoadError> {
        Err(LoadError::Unsupported(path.to_path_buf()))
    }

    pub unsafe fn symbol(_raw: &RawHandle, _name: &str) -> Result<*mut std::ffi::c_void, String> {
        Err("dynamic loading is not supported on this platform".to_string())
    }
}
