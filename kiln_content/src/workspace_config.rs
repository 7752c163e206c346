//! Persistent settings of a workspace.
//!
//! The configuration lives in a [`CONFIG_FILE_NAME`] file in the root of the workspace and
//! contains the output directory, the excluded extensions and the ordered list of
//! [`EncoderLink`]s that map file extensions to encoder modules. A missing or broken file never
//! blocks the pipeline: [`WorkspaceConfig::load`] falls back to [`WorkspaceConfig::default`].

use std::{
    env::{
        self,
        consts::{DLL_PREFIX, DLL_SUFFIX},
    },
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use kiln_shared::log::{info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::{common::normalize_extension, Error, Result};

/// Name of the configuration file in the root of the workspace.
pub const CONFIG_FILE_NAME: &str = "workspace.yaml";

/// Output directory relative to the workspace root that is used when nothing else is configured.
pub const DEFAULT_OUTPUT_DIRECTORY: &str = "../Assets";

/// Environment variable that points to the engine installation containing the default encoders.
pub const ENGINE_PATH_VARIABLE: &str = "KILN_PATH";

/// Maps a file extension to the encoder module that converts files with that extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderLink {
    pub extension: String,
    /// Path to the module. May contain `%NAME%` placeholders that are expanded on resolution.
    pub module_path: String,
}

impl EncoderLink {
    pub fn new(extension: impl Into<String>, module_path: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            module_path: module_path.into(),
        }
    }

    /// Returns whether the link applies to the given extension. The comparison ignores case and a leading dot.
    pub fn matches(&self, extension: &str) -> bool {
        normalize_extension(&self.extension) == normalize_extension(extension)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Directory into which the converted assets are written. Relative paths are resolved against the workspace root.
    pub output_directory: PathBuf,
    /// Extensions that are never processed, separated by whitespace, `,` or `;`.
    pub excluded_extensions: String,
    pub encoder_links: Vec<EncoderLink>,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from(DEFAULT_OUTPUT_DIRECTORY),
            excluded_extensions: String::new(),
            encoder_links: vec![
                EncoderLink::new("ttf", default_module_path("font_encoder")),
                EncoderLink::new("obj", default_module_path("mesh_encoder")),
                EncoderLink::new("png", default_module_path("texture_encoder")),
                EncoderLink::new("jpg", default_module_path("texture_encoder")),
                EncoderLink::new("tga", default_module_path("texture_encoder")),
                EncoderLink::new("bmp", default_module_path("texture_encoder")),
            ],
        }
    }
}

fn default_module_path(encoder_name: &str) -> String {
    format!("%{ENGINE_PATH_VARIABLE}%/tools/{encoder_name}/{DLL_PREFIX}{encoder_name}{DLL_SUFFIX}")
}

impl WorkspaceConfig {
    /// Returns the path of the configuration file for the workspace at `root`.
    pub fn file_path(root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(CONFIG_FILE_NAME)
    }

    /// Loads the configuration of the workspace at `root`.
    ///
    /// Falls back to the default configuration when the file is missing or cannot be parsed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use kiln_content::WorkspaceConfig;
    /// let config = WorkspaceConfig::load("a/workspace/without/config");
    /// assert_eq!(config, WorkspaceConfig::default());
    /// ```
    pub fn load(root: impl AsRef<Path>) -> Self {
        match Self::try_load(root) {
            Ok(config) => config,
            Err(err) => {
                warn!("{err}. Falling back to the default configuration");
                Self::default()
            }
        }
    }

    /// Loads the configuration of the workspace at `root` without falling back to the defaults.
    pub fn try_load(root: impl AsRef<Path>) -> Result<Self> {
        let path = Self::file_path(root);
        trace!("Reading workspace configuration: {}", path.display());
        let content = fs::read_to_string(&path).map_err(|err| Error::ConfigLoad {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        let config = serde_yaml::from_str(&content).map_err(|err| Error::ConfigLoad {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        info!("Loaded workspace configuration: {}", path.display());
        Ok(config)
    }

    /// Writes the configuration into the workspace at `root` and replaces the existing file.
    ///
    /// The content is written to a temporary file first which is then renamed so that an
    /// interrupted save never leaves the workspace without a configuration file.
    pub fn save(&self, root: impl AsRef<Path>) -> Result<()> {
        let path = Self::file_path(&root);
        let temp_path = root.as_ref().join(format!(".{CONFIG_FILE_NAME}.tmp"));
        let save_error = |reason: String| Error::ConfigSave {
            path: path.clone(),
            reason,
        };

        let content = serde_yaml::to_string(self).map_err(|err| save_error(err.to_string()))?;
        let write_result = File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(content.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temp_path, &path));
        if let Err(err) = write_result {
            if temp_path.exists() {
                let _ = fs::remove_file(&temp_path);
            }
            return Err(save_error(err.to_string()));
        }

        info!("Saved workspace configuration: {}", path.display());
        Ok(())
    }

    /// Restores the default configuration.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns the normalized tokens of [`WorkspaceConfig::excluded_extensions`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use kiln_content::WorkspaceConfig;
    /// let config = WorkspaceConfig {
    ///     excluded_extensions: ".PSD, blend;txt".to_owned(),
    ///     ..WorkspaceConfig::default()
    /// };
    /// assert_eq!(config.excluded_extension_tokens(), vec!["psd", "blend", "txt"]);
    /// ```
    pub fn excluded_extension_tokens(&self) -> Vec<String> {
        self.excluded_extensions
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .map(normalize_extension)
            .filter(|token| !token.is_empty())
            .collect()
    }

    /// Returns whether files with the given extension are excluded from processing.
    pub fn is_excluded(&self, extension: &str) -> bool {
        let extension = normalize_extension(extension);
        !extension.is_empty() && self.excluded_extension_tokens().contains(&extension)
    }

    /// Returns the unexpanded module path of the first link that matches the extension.
    pub fn module_path_for(&self, extension: &str) -> Option<&str> {
        self.encoder_links
            .iter()
            .find(|link| link.matches(extension))
            .map(|link| link.module_path.as_str())
    }

    /// Returns the output directory resolved against the workspace root.
    pub fn output_path(&self, root: impl AsRef<Path>) -> PathBuf {
        root.as_ref().join(&self.output_directory)
    }
}

/// Replaces every `%NAME%` placeholder with the value returned by `lookup`.
///
/// Placeholders for which `lookup` returns `None` are kept verbatim. Names consist of ASCII
/// letters, digits and underscores.
///
/// # Example
///
/// ```rust
/// use kiln_content::expand_placeholders;
/// let lookup = |name: &str| (name == "ENGINE").then(|| "/opt/engine".to_owned());
/// assert_eq!(expand_placeholders("%ENGINE%/tools/%UNSET%", lookup), "/opt/engine/tools/%UNSET%");
/// ```
pub fn expand_placeholders(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('%') {
        expanded.push_str(&rest[..start]);
        let after_start = &rest[start + 1..];
        let Some(end) = after_start.find('%') else {
            expanded.push_str(&rest[start..]);
            return expanded;
        };

        let name = &after_start[..end];
        let is_name = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_name {
            // The closing '%' may open the next placeholder.
            expanded.push('%');
            rest = after_start;
            continue;
        }

        match lookup(name) {
            Some(replacement) => expanded.push_str(&replacement),
            None => expanded.push_str(&rest[start..start + end + 2]),
        }
        rest = &after_start[end + 1..];
    }
    expanded.push_str(rest);
    expanded
}

/// Expands `%NAME%` placeholders with the current values of the environment variables.
pub fn expand_env_placeholders(value: &str) -> String {
    expand_placeholders(value, |name| env::var(name).ok())
}
