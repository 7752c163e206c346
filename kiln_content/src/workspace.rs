use std::{
    collections::{BTreeMap, BTreeSet},
    env,
    fmt::{self, Display, Formatter},
    fs, io,
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use kiln_shared::{
    log::{error, info, trace, warn},
    num_cpus, pathdiff,
    rayon::{prelude::*, ThreadPoolBuilder},
    walkdir::WalkDir,
};

use crate::{
    common::{extract_extension_from_path, normalize_lexically},
    encoder::{Encoder, EncoderLoader, NativeLoader},
    encoder_registry::EncoderRegistry,
    workspace_config::WorkspaceConfig,
    AssetKey, Error, Result,
};

/// A file of the workspace together with the location its converted form is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    /// Path relative to the workspace root.
    pub asset_key: AssetKey,
    pub source_path: PathBuf,
    /// Lower-case extension of the source file. Empty when the file has no extension.
    pub extension: String,
    /// Mirrors the location of the source file relative to the workspace in the output directory.
    pub destination_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ExcludedExtension,
    NoEncoder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The encoder module for the extension could not be loaded.
    PluginLoad(String),
    /// `Convert` returned `false`.
    ConversionFailed,
    /// `Update` returned `false`.
    UpdateFailed,
    /// The destination directory could not be created.
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetState {
    Skipped(SkipReason),
    Pending,
    Converted,
    Updated,
    Failed(FailureReason),
    /// The batch was cancelled before the asset was dispatched.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReport {
    pub record: AssetRecord,
    pub state: AssetState,
}

impl Display for AssetReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let asset_key = &self.record.asset_key;
        match &self.state {
            AssetState::Skipped(SkipReason::ExcludedExtension) => write!(f, "Skipped '{asset_key}': extension is excluded"),
            AssetState::Skipped(SkipReason::NoEncoder) => write!(f, "Skipped '{asset_key}': no encoder for the extension"),
            AssetState::Pending => write!(f, "Pending '{asset_key}'"),
            AssetState::Converted => write!(f, "Converted '{asset_key}'"),
            AssetState::Updated => write!(f, "Updated '{asset_key}'"),
            AssetState::Failed(FailureReason::PluginLoad(reason)) => write!(f, "Failed '{asset_key}': {reason}"),
            AssetState::Failed(FailureReason::ConversionFailed) => write!(f, "Failed '{asset_key}': conversion was unsuccessful"),
            AssetState::Failed(FailureReason::UpdateFailed) => write!(f, "Failed '{asset_key}': update was unsuccessful"),
            AssetState::Failed(FailureReason::Io(reason)) => write!(f, "Failed '{asset_key}': {reason}"),
            AssetState::Cancelled => write!(f, "Cancelled '{asset_key}'"),
        }
    }
}

/// Result of a [`Workspace::pack`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// One report per scanned file in scan order.
    pub reports: Vec<AssetReport>,
    pub converted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl BatchSummary {
    fn new(reports: Vec<AssetReport>) -> Self {
        let count = |predicate: fn(&AssetState) -> bool| reports.iter().filter(|report| predicate(&report.state)).count();
        Self {
            converted: count(|state| matches!(state, AssetState::Converted)),
            failed: count(|state| matches!(state, AssetState::Failed(_))),
            skipped: count(|state| matches!(state, AssetState::Skipped(_))),
            cancelled: count(|state| matches!(state, AssetState::Cancelled)),
            reports,
        }
    }

    /// Returns whether every file was either converted or skipped.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// Returns the report of the asset.
    pub fn report(&self, asset_key: impl Into<AssetKey>) -> Option<&AssetReport> {
        let asset_key = asset_key.into();
        self.reports.iter().find(|report| report.record.asset_key == asset_key)
    }
}

impl Display for BatchSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} converted, {} failed, {} skipped, {} cancelled",
            self.converted, self.failed, self.skipped, self.cancelled
        )
    }
}

/// Cooperative cancellation of a running [`Workspace::pack`].
///
/// Conversions that are already running are finished but no new ones are started.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Converts the files of a workspace with the encoders from its configuration.
pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
    registry: EncoderRegistry,
    num_threads: usize,
    cancellation_token: CancellationToken,
}

impl Workspace {
    /// Opens the workspace at `root` and loads its configuration. Encoders are loaded as native modules.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_loader(root, NativeLoader)
    }

    /// Opens the workspace at `root` and loads encoders with the given [`EncoderLoader`].
    pub fn with_loader(root: impl AsRef<Path>, loader: impl EncoderLoader + 'static) -> Result<Self> {
        let root = normalize_lexically(&env::current_dir()?.join(root));
        if !root.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("Directory '{}' does not exist", root.display())).into());
        }
        info!("Opening workspace '{}'", root.display());
        let config = WorkspaceConfig::load(&root);
        let registry = EncoderRegistry::new(&root, loader);
        Ok(Self {
            root,
            config,
            registry,
            num_threads: num_cpus::get(),
            cancellation_token: CancellationToken::default(),
        })
    }

    /// Sets the number of threads that convert assets in parallel.
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut WorkspaceConfig {
        &mut self.config
    }

    pub fn encoders(&self) -> &EncoderRegistry {
        &self.registry
    }

    /// Returns a token with which a running [`Workspace::pack`] can be cancelled from another thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Reads the configuration file again and unloads all encoders.
    pub fn load_configuration(&mut self) {
        self.config = WorkspaceConfig::load(&self.root);
        self.registry.clear();
    }

    pub fn save_configuration(&self) -> Result<()> {
        self.config.save(&self.root)
    }

    /// Restores the default configuration and unloads all encoders. The file is not written.
    pub fn reset_configuration(&mut self) {
        self.config.reset();
        self.registry.clear();
    }

    /// Unloads all encoders. They are loaded again when they are needed.
    pub fn clear_encoders(&mut self) {
        self.registry.clear();
    }

    /// Lists all files of the workspace and determines whether they are processed.
    ///
    /// The configuration file and the content of the output directory are not listed.
    pub fn scan(&self) -> Vec<AssetReport> {
        let output_path = normalize_lexically(&self.config.output_path(&self.root));
        let config_path = WorkspaceConfig::file_path(&self.root);
        info!("Scanning workspace '{}'", self.root.display());
        if output_path == self.root {
            warn!("Output directory '{}' is the workspace root", output_path.display());
        }

        let mut reports = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || entry.path() != output_path);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to read directory entry: {err}");
                    continue;
                }
            };
            if entry.file_type().is_dir() || entry.path() == config_path {
                continue;
            }

            let Some(relative_path) = pathdiff::diff_paths(entry.path(), &self.root) else {
                warn!("Failed to get relative path of '{}' relative to '{}'", entry.path().display(), self.root.display());
                continue;
            };
            let record = self.record(relative_path);
            let state = if self.config.is_excluded(&record.extension) {
                AssetState::Skipped(SkipReason::ExcludedExtension)
            } else if self.config.module_path_for(&record.extension).is_none() {
                AssetState::Skipped(SkipReason::NoEncoder)
            } else {
                AssetState::Pending
            };
            trace!("Scanned '{}': {state:?}", record.asset_key);
            reports.push(AssetReport { record, state });
        }
        reports
    }

    /// Converts every file of the workspace for which an encoder is configured.
    ///
    /// A file that fails to convert doesn't stop the other files from being converted.
    /// Existing converted files are overwritten.
    ///
    /// Fails with [`Error::InvalidPath`] when the output directory is the workspace root because
    /// the converted files would overwrite their sources.
    pub fn pack(&mut self) -> Result<BatchSummary> {
        let output_path = normalize_lexically(&self.config.output_path(&self.root));
        if output_path == self.root {
            error!("Output directory '{}' must not be the workspace root", output_path.display());
            return Err(Error::InvalidPath(output_path));
        }
        info!("Packing workspace '{}' into '{}'", self.root.display(), output_path.display());
        let mut reports = self.scan();

        // Module loading is serialized so all encoders are resolved before the parallel part starts.
        let extensions = reports
            .iter()
            .filter(|report| report.state == AssetState::Pending)
            .map(|report| report.record.extension.clone())
            .collect::<BTreeSet<_>>();
        let mut module_paths = BTreeMap::new();
        let mut load_failures = BTreeMap::new();
        for extension in extensions {
            let result = self
                .registry
                .resolve_module_path(&self.config, &extension)
                .and_then(|module_path| self.registry.load(&module_path).map(|_| module_path).map_err(Error::from));
            match result {
                Ok(module_path) => {
                    module_paths.insert(extension, module_path);
                }
                Err(err) => {
                    error!("Files with extension '{extension}' can't be converted: {err}");
                    load_failures.insert(extension, err.to_string());
                }
            }
        }
        for report in &mut reports {
            if report.state != AssetState::Pending {
                continue;
            }
            if let Some(reason) = load_failures.get(&report.record.extension) {
                report.state = AssetState::Failed(FailureReason::PluginLoad(reason.clone()));
            }
        }

        info!("Create thread pool with {} threads for packing", self.num_threads);
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|thread_index| format!("Pack thread {thread_index}"))
            .build()
            .map_err(|_| Error::FailedToStartThreadPool)?;

        let registry = &self.registry;
        let cancellation_token = &self.cancellation_token;
        thread_pool.install(|| {
            reports
                .par_iter_mut()
                .filter(|report| report.state == AssetState::Pending)
                .for_each(|report| {
                    let encoder = module_paths
                        .get(&report.record.extension)
                        .and_then(|module_path| registry.get(module_path));
                    report.state = convert_asset(&report.record, encoder, cancellation_token);
                });
        });

        if self.cancellation_token.is_cancelled() {
            warn!("Packing was cancelled");
            self.cancellation_token.reset();
        }

        let summary = BatchSummary::new(reports);
        for report in &summary.reports {
            match report.state {
                AssetState::Failed(_) => error!("{report}"),
                _ => info!("{report}"),
            }
        }
        info!("Packing finished: {summary}");
        Ok(summary)
    }

    /// Refreshes the already converted asset with the `Update` operation of its encoder.
    ///
    /// `path` is either absolute or relative to the workspace root. An unsuccessful update is
    /// reported in the returned [`AssetReport`] and is never retried with a full conversion.
    pub fn update(&mut self, path: impl AsRef<Path>) -> Result<AssetReport> {
        let source_path = normalize_lexically(&self.root.join(path.as_ref()));
        let relative_path = pathdiff::diff_paths(&source_path, &self.root)
            .filter(|relative_path| !relative_path.components().any(|component| component == Component::ParentDir))
            .ok_or_else(|| Error::InvalidPath(source_path.clone()))?;
        if !source_path.is_file() {
            return Err(Error::InvalidPath(source_path));
        }

        let record = self.record(relative_path);
        if self.config.is_excluded(&record.extension) {
            return Err(Error::ExtensionExcluded(record.extension));
        }
        let module_path = self.registry.resolve_module_path(&self.config, &record.extension)?;
        let encoder = self.registry.load(&module_path)?;

        info!("Updating '{}'", record.asset_key);
        let state = if encoder.update(&record.source_path) {
            AssetState::Updated
        } else {
            AssetState::Failed(FailureReason::UpdateFailed)
        };
        let report = AssetReport { record, state };
        match report.state {
            AssetState::Updated => info!("{report}"),
            _ => error!("{report}"),
        }
        Ok(report)
    }

    fn record(&self, relative_path: PathBuf) -> AssetRecord {
        let extension = extract_extension_from_path(&relative_path).unwrap_or_default();
        AssetRecord {
            source_path: self.root.join(&relative_path),
            destination_path: normalize_lexically(&self.config.output_path(&self.root).join(&relative_path)),
            extension,
            asset_key: AssetKey::new(relative_path),
        }
    }
}

fn convert_asset(record: &AssetRecord, encoder: Option<&dyn Encoder>, cancellation_token: &CancellationToken) -> AssetState {
    if cancellation_token.is_cancelled() {
        trace!("Not converting '{}' because packing was cancelled", record.asset_key);
        return AssetState::Cancelled;
    }
    let Some(encoder) = encoder else {
        return AssetState::Failed(FailureReason::PluginLoad(format!(
            "No encoder was loaded for extension '{}'",
            record.extension
        )));
    };

    if let Some(parent) = record.destination_path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            return AssetState::Failed(FailureReason::Io(format!(
                "Failed to create directory '{}': {err}",
                parent.display()
            )));
        }
    }

    info!("Converting '{}'", record.asset_key);
    if encoder.convert(&record.source_path, &record.destination_path) {
        AssetState::Converted
    } else {
        AssetState::Failed(FailureReason::ConversionFailed)
    }
}
