use std::{
    collections::{btree_map::Entry, BTreeMap},
    fs,
    path::{Path, PathBuf},
};

use kiln_shared::log::{info, trace};

use crate::{
    common::{normalize_lexically, normalize_extension},
    encoder::{Encoder, EncoderLoader, PluginLoadError},
    workspace_config::{expand_env_placeholders, WorkspaceConfig},
    Error, Result,
};

/// Owns the loaded encoder modules and hands them out by extension.
///
/// Modules are identified by their normalized path so that several extensions mapped to the
/// same module share one loaded instance. The modules are unloaded when the registry is
/// [cleared](EncoderRegistry::clear) or dropped.
pub struct EncoderRegistry {
    base_directory: PathBuf,
    loader: Box<dyn EncoderLoader>,
    encoders: BTreeMap<PathBuf, Box<dyn Encoder>>,
}

impl EncoderRegistry {
    /// Creates an empty registry. Relative module paths are resolved against `base_directory`.
    pub fn new(base_directory: impl Into<PathBuf>, loader: impl EncoderLoader + 'static) -> Self {
        Self {
            base_directory: base_directory.into(),
            loader: Box::new(loader),
            encoders: BTreeMap::new(),
        }
    }

    /// Returns the normalized path of the module that is mapped to the extension.
    ///
    /// Placeholders in the configured path are expanded with the current environment.
    pub fn resolve_module_path(&self, config: &WorkspaceConfig, extension: &str) -> Result<PathBuf> {
        let module_path = config
            .module_path_for(extension)
            .ok_or_else(|| Error::ExtensionNotRegistered(normalize_extension(extension)))?;
        let expanded = expand_env_placeholders(module_path);
        trace!("Module path '{module_path}' for extension '{extension}' expands to '{expanded}'");
        Ok(self.normalize_module_path(Path::new(&expanded)))
    }

    /// Returns the encoder for the extension and loads its module if that didn't happen yet.
    pub fn resolve(&mut self, config: &WorkspaceConfig, extension: &str) -> Result<&dyn Encoder> {
        let module_path = self.resolve_module_path(config, extension)?;
        Ok(self.load(&module_path)?)
    }

    /// Returns the encoder for the normalized module path and loads the module if that didn't happen yet.
    ///
    /// A module that fails to load is not remembered so that a later call tries again.
    pub fn load(&mut self, module_path: &Path) -> std::result::Result<&dyn Encoder, PluginLoadError> {
        match self.encoders.entry(module_path.to_owned()) {
            Entry::Occupied(entry) => {
                trace!("Encoder module '{}' is already loaded", module_path.display());
                Ok(&**entry.into_mut())
            }
            Entry::Vacant(entry) => {
                info!("Loading encoder module '{}'", module_path.display());
                let encoder = self.loader.load(module_path)?;
                Ok(&**entry.insert(encoder))
            }
        }
    }

    /// Returns the encoder for the normalized module path if the module is loaded.
    pub fn get(&self, module_path: &Path) -> Option<&dyn Encoder> {
        self.encoders.get(module_path).map(|encoder| encoder.as_ref())
    }

    /// Unloads all modules.
    pub fn clear(&mut self) {
        if !self.encoders.is_empty() {
            info!("Unloading {} encoder module(s)", self.encoders.len());
        }
        self.encoders.clear();
    }

    /// Number of loaded modules.
    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    fn normalize_module_path(&self, module_path: &Path) -> PathBuf {
        let absolute_path = if module_path.is_absolute() {
            module_path.to_owned()
        } else {
            self.base_directory.join(module_path)
        };
        let normalized = normalize_lexically(&absolute_path);
        fs::canonicalize(&normalized).unwrap_or(normalized)
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use kiln_test::{setup_logger, test_workspace};

    use super::*;
    use crate::{test_utils::MockLoader, EncoderLink};

    fn config(links: &[(&str, &str)]) -> WorkspaceConfig {
        WorkspaceConfig {
            encoder_links: links
                .iter()
                .map(|(extension, module_path)| EncoderLink::new(*extension, *module_path))
                .collect(),
            ..WorkspaceConfig::default()
        }
    }

    fn address(encoder: &dyn Encoder) -> *const () {
        encoder as *const dyn Encoder as *const ()
    }

    #[test]
    fn resolving_twice_returns_cached_encoder() {
        setup_logger();
        let workspace = test_workspace!();
        let loader = MockLoader::new();
        let mut registry = EncoderRegistry::new(workspace.root(), loader.clone());
        let config = config(&[("png", "tools/texture.so")]);

        let first = address(registry.resolve(&config, "png").unwrap());
        let second = address(registry.resolve(&config, "PNG").unwrap());
        assert_eq!(first, second);
        assert_eq!(loader.load_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn extensions_share_module() {
        setup_logger();
        let workspace = test_workspace!();
        let loader = MockLoader::new();
        let mut registry = EncoderRegistry::new(workspace.root(), loader.clone());
        let config = config(&[("png", "tools/texture.so"), ("jpg", "tools/./texture.so"), ("obj", "tools/mesh.so")]);

        let png = address(registry.resolve(&config, "png").unwrap());
        let jpg = address(registry.resolve(&config, "jpg").unwrap());
        registry.resolve(&config, "obj").unwrap();
        assert_eq!(png, jpg);
        assert_eq!(
            loader.loaded_modules(),
            vec![workspace.root().join("tools/texture.so"), workspace.root().join("tools/mesh.so")]
        );
    }

    #[test]
    fn unmapped_extension() {
        setup_logger();
        let workspace = test_workspace!();
        let mut registry = EncoderRegistry::new(workspace.root(), MockLoader::new());
        let result = registry.resolve(&config(&[("png", "texture.so")]), ".TXT");
        assert!(matches!(result, Err(Error::ExtensionNotRegistered(extension)) if extension == "txt"));
    }

    #[test]
    fn load_failure_is_scoped_to_module() {
        setup_logger();
        let workspace = test_workspace!();
        let loader = MockLoader::new().fail_to_load("mesh.so");
        let mut registry = EncoderRegistry::new(workspace.root(), loader.clone());
        let config = config(&[("obj", "mesh.so"), ("png", "texture.so")]);

        let err = registry.resolve(&config, "obj").err().unwrap();
        assert!(matches!(&err, Error::PluginLoad(err) if err.module_path == workspace.root().join("mesh.so")));
        assert!(registry.resolve(&config, "png").is_ok());
        assert_eq!(registry.len(), 1);

        // Failed loads are not cached.
        assert!(registry.resolve(&config, "obj").is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_unloads_modules() {
        setup_logger();
        let workspace = test_workspace!();
        let loader = MockLoader::new();
        let mut registry = EncoderRegistry::new(workspace.root(), loader.clone());
        let config = config(&[("png", "texture.so")]);

        registry.resolve(&config, "png").unwrap();
        let module_path = registry.resolve_module_path(&config, "png").unwrap();
        assert!(registry.get(&module_path).is_some());

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get(&module_path).is_none());

        registry.resolve(&config, "png").unwrap();
        assert_eq!(loader.load_count(), 2);
    }

    #[test]
    fn placeholders_are_expanded_on_every_resolution() {
        setup_logger();
        const VARIABLE: &str = "KILN_REGISTRY_TEST_ENCODER_DIR";
        let workspace = test_workspace!();
        let mut registry = EncoderRegistry::new(workspace.root(), MockLoader::new());
        let config = config(&[("png", "%KILN_REGISTRY_TEST_ENCODER_DIR%/texture.so")]);

        env::set_var(VARIABLE, workspace.root().join("first"));
        let first = registry.resolve_module_path(&config, "png").unwrap();
        registry.resolve(&config, "png").unwrap();
        registry.clear();

        env::set_var(VARIABLE, workspace.root().join("second"));
        let second = registry.resolve_module_path(&config, "png").unwrap();
        registry.resolve(&config, "png").unwrap();
        env::remove_var(VARIABLE);

        assert_eq!(first, workspace.root().join("first/texture.so"));
        assert_eq!(second, workspace.root().join("second/texture.so"));
        assert_ne!(first, second);
    }
}
