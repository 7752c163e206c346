use std::{
    borrow::Cow,
    fmt::{self, Formatter},
    io,
    path::{Component, Path, PathBuf},
    result,
};

use kiln_shared::thiserror;

use crate::encoder::PluginLoadError;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),
    #[error("IoError: {0}")]
    IoError(#[from] io::Error),
    #[error("Failed to load the workspace configuration from {}: {reason}", .path.display())]
    ConfigLoad { path: PathBuf, reason: String },
    #[error("Failed to save the workspace configuration to {}: {reason}", .path.display())]
    ConfigSave { path: PathBuf, reason: String },
    #[error(transparent)]
    PluginLoad(#[from] PluginLoadError),
    #[error("Extension not registered: {0}")]
    ExtensionNotRegistered(String),
    #[error("Extension is excluded from processing: {0}")]
    ExtensionExcluded(String),
    #[error("Failed to start thread pool")]
    FailedToStartThreadPool,
}

/// Identifies the asset. It's a relative path in the workspace directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetKey(PathBuf);

impl AssetKey {
    /// Create a new [`AssetKey`] from a path. No validation is done on the path.
    ///
    /// # Example
    ///
    /// ```rust
    /// use kiln_content::AssetKey;
    /// let asset_key = AssetKey::new("textures/character.png");
    /// assert_eq!(asset_key.as_str(), "textures/character.png");
    /// ```
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Returns the path of the asset.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use std::ffi::OsStr;
    /// use kiln_content::AssetKey;
    /// let asset_key = AssetKey::new("textures/character.png");
    /// assert_eq!(asset_key.as_path().extension(), Some(OsStr::new("png")));
    /// ```
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Returns the path of the asset as a string.
    pub fn as_str(&self) -> Cow<str> {
        self.0.to_string_lossy()
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for AssetKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<&Path> for AssetKey {
    fn from(value: &Path) -> Self {
        Self::new(value)
    }
}

/// Brings an extension token into the form that is used for comparisons.
///
/// # Example
///
/// ```rust
/// use kiln_content::normalize_extension;
/// assert_eq!(normalize_extension(" .PNG"), "png");
/// ```
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

pub(crate) fn extract_extension_from_path(path: &Path) -> Result<String> {
    Ok(path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extension.to_lowercase())
        .ok_or(Error::InvalidPath(path.to_owned()))?
        .to_owned())
}

/// Folds `.` and `..` components without touching the filesystem.
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(component),
            },
            _ => normalized.push(component),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lower_case() {
        let extension = extract_extension_from_path(Path::new("textures/Wall.PNG")).unwrap();
        assert_eq!(extension, "png");
    }

    #[test]
    fn lexical_normalization() {
        assert_eq!(normalize_lexically(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_lexically(Path::new("/a/../../c")), PathBuf::from("/c"));
        assert_eq!(normalize_lexically(Path::new("../a/b/..")), PathBuf::from("../a"));
    }

    #[test]
    fn missing_extension() {
        let result = extract_extension_from_path(Path::new("textures/README"));
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }
}
