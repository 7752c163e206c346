//! In-process stand-ins for native encoder modules.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use kiln_shared::parking_lot::Mutex;

use crate::{
    encoder::{Encoder, EncoderLoader, PluginLoadError, PluginLoadErrorKind},
    CancellationToken,
};

/// A call that was made into a [`MockEncoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderCall {
    Convert { source: PathBuf, destination: PathBuf },
    Update { path: PathBuf },
}

#[derive(Default)]
struct MockState {
    loads: Mutex<Vec<PathBuf>>,
    calls: Mutex<Vec<EncoderCall>>,
    unloadable_modules: Mutex<HashSet<String>>,
    failing_files: Mutex<HashSet<String>>,
    cancel_on: Mutex<Option<(String, CancellationToken)>>,
}

/// [`EncoderLoader`] that creates [`MockEncoder`]s and records everything that happens.
///
/// Clones share their state so that a test can keep a clone after handing the loader over.
#[derive(Clone, Default)]
pub struct MockLoader {
    state: Arc<MockState>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loading modules with the given file name fails with [`PluginLoadErrorKind::ModuleNotFound`].
    pub fn fail_to_load(self, module_file_name: &str) -> Self {
        self.state.unloadable_modules.lock().insert(module_file_name.to_owned());
        self
    }

    /// `convert` and `update` return `false` for files with the given file name.
    pub fn fail_on(self, file_name: &str) -> Self {
        self.state.failing_files.lock().insert(file_name.to_owned());
        self
    }

    /// Cancels the token when the file with the given file name is converted.
    pub fn cancel_on(self, file_name: &str, cancellation_token: CancellationToken) -> Self {
        *self.state.cancel_on.lock() = Some((file_name.to_owned(), cancellation_token));
        self
    }

    /// Number of modules that have been loaded.
    pub fn load_count(&self) -> usize {
        self.state.loads.lock().len()
    }

    pub fn loaded_modules(&self) -> Vec<PathBuf> {
        self.state.loads.lock().clone()
    }

    pub fn calls(&self) -> Vec<EncoderCall> {
        self.state.calls.lock().clone()
    }

    /// File names of all sources passed to `convert`, sorted.
    pub fn converted_file_names(&self) -> Vec<String> {
        let mut file_names = self
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                EncoderCall::Convert { source, .. } => Some(file_name(&source)),
                EncoderCall::Update { .. } => None,
            })
            .collect::<Vec<_>>();
        file_names.sort();
        file_names
    }
}

impl EncoderLoader for MockLoader {
    fn load(&self, module_path: &Path) -> Result<Box<dyn Encoder>, PluginLoadError> {
        if self.state.unloadable_modules.lock().contains(&file_name(module_path)) {
            return Err(PluginLoadError::new(module_path, PluginLoadErrorKind::ModuleNotFound));
        }
        self.state.loads.lock().push(module_path.to_owned());
        Ok(Box::new(MockEncoder { state: self.state.clone() }))
    }
}

/// Copies the source to the destination on `convert` and touches nothing on `update`.
pub struct MockEncoder {
    state: Arc<MockState>,
}

impl MockEncoder {
    fn should_fail(&self, path: &Path) -> bool {
        self.state.failing_files.lock().contains(&file_name(path))
    }
}

impl Encoder for MockEncoder {
    fn convert(&self, source_path: &Path, destination_path: &Path) -> bool {
        self.state.calls.lock().push(EncoderCall::Convert {
            source: source_path.to_owned(),
            destination: destination_path.to_owned(),
        });
        if let Some((cancel_file_name, cancellation_token)) = self.state.cancel_on.lock().as_ref() {
            if *cancel_file_name == file_name(source_path) {
                cancellation_token.cancel();
            }
        }
        if self.should_fail(source_path) {
            return false;
        }
        fs::copy(source_path, destination_path).is_ok()
    }

    fn update(&self, path: &Path) -> bool {
        self.state.calls.lock().push(EncoderCall::Update { path: path.to_owned() });
        !self.should_fail(path)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default()
}
