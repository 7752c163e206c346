//! Encoder modules are native shared libraries that export two functions with the C calling
//! convention:
//!
//! ```c
//! bool Convert(const char* source, const char* destination);
//! bool Update(const char* path);
//! ```
//!
//! `Convert` performs the full conversion of a source asset into the engine format and `Update`
//! refreshes an already converted asset. Both return whether the operation succeeded. What
//! happens inside a module is opaque to the pipeline.

use std::{
    fmt,
    os::raw::c_char,
    path::{Path, PathBuf},
};

use kiln_shared::{
    log::{error, info},
    parking_lot::{const_mutex, Mutex},
    path_to_c_string, thiserror,
};
use libloading::Library;

pub const CONVERT_ENTRY_POINT: &str = "Convert";
pub const UPDATE_ENTRY_POINT: &str = "Update";

type ConvertFn = unsafe extern "C" fn(source: *const c_char, destination: *const c_char) -> bool;
type UpdateFn = unsafe extern "C" fn(path: *const c_char) -> bool;

/// Serializes all module loads of the process.
static LOAD_LOCK: Mutex<()> = const_mutex(());

/// The two capabilities every encoder module provides.
pub trait Encoder: Send + Sync {
    /// Converts the file at `source_path` into the engine format at `destination_path`.
    fn convert(&self, source_path: &Path, destination_path: &Path) -> bool;

    /// Refreshes the already converted asset that belongs to `path` without a full conversion.
    fn update(&self, path: &Path) -> bool;
}

/// Creates [`Encoder`]s from module paths.
pub trait EncoderLoader: Send + Sync {
    fn load(&self, module_path: &Path) -> Result<Box<dyn Encoder>, PluginLoadError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Encoder module '{}' {}", .module_path.display(), .kind)]
pub struct PluginLoadError {
    pub module_path: PathBuf,
    pub kind: PluginLoadErrorKind,
}

impl PluginLoadError {
    pub fn new(module_path: impl Into<PathBuf>, kind: PluginLoadErrorKind) -> Self {
        Self {
            module_path: module_path.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginLoadErrorKind {
    #[error("does not exist")]
    ModuleNotFound,
    #[error("could not be opened: {0}")]
    OpenFailed(String),
    #[error("does not export the \"{0}\" entry point")]
    MissingEntryPoint(&'static str),
}

/// Loads encoder modules as native shared libraries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl EncoderLoader for NativeLoader {
    fn load(&self, module_path: &Path) -> Result<Box<dyn Encoder>, PluginLoadError> {
        Ok(Box::new(NativeEncoder::load(module_path)?))
    }
}

/// An encoder module that is loaded into the process. The module is unloaded when this value is dropped.
pub struct NativeEncoder {
    module_path: PathBuf,
    convert_fn: ConvertFn,
    update_fn: UpdateFn,
    // Must outlive the function pointers.
    _library: Library,
}

impl NativeEncoder {
    /// Loads the module at `module_path` and resolves its entry points.
    ///
    /// The directory of the module is searched for the dependencies of the module.
    pub fn load(module_path: impl AsRef<Path>) -> Result<Self, PluginLoadError> {
        let module_path = module_path.as_ref();
        if !module_path.is_file() {
            return Err(PluginLoadError::new(module_path, PluginLoadErrorKind::ModuleNotFound));
        }

        let library = {
            let _guard = LOAD_LOCK.lock();
            // SAFETY: Loading a module runs its initialization routines. Encoder modules are trusted.
            unsafe { open_library(module_path) }
                .map_err(|err| PluginLoadError::new(module_path, PluginLoadErrorKind::OpenFailed(err.to_string())))?
        };

        // SAFETY: The signatures are fixed by the encoder ABI.
        let convert_fn = unsafe { library.get::<ConvertFn>(b"Convert\0") }
            .map(|symbol| *symbol)
            .map_err(|_| PluginLoadError::new(module_path, PluginLoadErrorKind::MissingEntryPoint(CONVERT_ENTRY_POINT)))?;
        let update_fn = unsafe { library.get::<UpdateFn>(b"Update\0") }
            .map(|symbol| *symbol)
            .map_err(|_| PluginLoadError::new(module_path, PluginLoadErrorKind::MissingEntryPoint(UPDATE_ENTRY_POINT)))?;

        info!("Loaded encoder module '{}'", module_path.display());
        Ok(Self {
            module_path: module_path.to_owned(),
            convert_fn,
            update_fn,
            _library: library,
        })
    }

    /// Path from which the module was loaded.
    pub fn module_path(&self) -> &Path {
        &self.module_path
    }
}

impl Encoder for NativeEncoder {
    fn convert(&self, source_path: &Path, destination_path: &Path) -> bool {
        let (Some(source), Some(destination)) = (path_to_c_string(source_path), path_to_c_string(destination_path)) else {
            error!(
                "Paths '{}' and '{}' cannot be passed to encoder module '{}'",
                source_path.display(),
                destination_path.display(),
                self.module_path.display()
            );
            return false;
        };
        // SAFETY: Both strings are null-terminated and outlive the call.
        unsafe { (self.convert_fn)(source.as_ptr(), destination.as_ptr()) }
    }

    fn update(&self, path: &Path) -> bool {
        let Some(c_path) = path_to_c_string(path) else {
            error!("Path '{}' cannot be passed to encoder module '{}'", path.display(), self.module_path.display());
            return false;
        };
        // SAFETY: The string is null-terminated and outlives the call.
        unsafe { (self.update_fn)(c_path.as_ptr()) }
    }
}

impl fmt::Debug for NativeEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEncoder").field("module_path", &self.module_path).finish()
    }
}

impl Drop for NativeEncoder {
    fn drop(&mut self) {
        info!("Unloading encoder module '{}'", self.module_path.display());
    }
}

/// Opens the library and makes the directory of the module searchable for its dependencies.
#[cfg(windows)]
unsafe fn open_library(module_path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::windows::{self, LOAD_LIBRARY_SEARCH_DEFAULT_DIRS, LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR};
    windows::Library::load_with_flags(module_path, LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR | LOAD_LIBRARY_SEARCH_DEFAULT_DIRS).map(Into::into)
}

/// Opens the library. Dependencies next to the module are found through the `$ORIGIN` run path of the module.
#[cfg(unix)]
unsafe fn open_library(module_path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{self, RTLD_LOCAL, RTLD_NOW};
    unix::Library::open(Some(module_path), RTLD_NOW | RTLD_LOCAL).map(Into::into)
}
