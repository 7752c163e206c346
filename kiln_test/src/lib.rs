use std::{
    fs,
    path::{Path, PathBuf},
};

use kiln_shared::log::LevelFilter;
use tempdir::TempDir;

pub use kiln_shared::function_name;
pub use spectral;

/// Creates a new [`TempDir`] for the test function in which the macro is executed.
///
/// The directory is prefixed with the name of the test so that leftovers can be traced back.
#[macro_export]
macro_rules! test_workspace {
    () => {{
        let test_name = $crate::function_name!().replace("::", ".");
        $crate::TestWorkspace::new(&test_name)
    }};
}

/// Sets up a logger that prints everything. Can be called from multiple tests.
pub fn setup_logger() {
    // Only the first test that calls this function is able to install the logger.
    let _ = simple_logger::SimpleLogger::new().with_level(LevelFilter::Trace).init();
}

/// Scratch directory that acts as the root of a workspace and is removed when dropped.
pub struct TestWorkspace {
    pub test_name: String,
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a new empty workspace directory.
    pub fn new(test_name: &str) -> Self {
        let temp_dir = TempDir::new(test_name).expect("Failed to create the temporary workspace directory");
        Self {
            test_name: test_name.to_owned(),
            temp_dir,
        }
    }

    /// Root directory of the workspace.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a file relative to the workspace root and creates the parent directories.
    pub fn write(&self, relative_path: impl AsRef<Path>, content: &str) -> PathBuf {
        write_file(self.root().join(relative_path), content)
    }

    /// Writes the given files relative to the workspace root.
    pub fn with_files(self, files: &[&str]) -> Self {
        for file in files {
            self.write(file, file);
        }
        self
    }
}

/// Writes a file and creates the parent directories. Panics on failure.
pub fn write_file(path: impl AsRef<Path>, content: &str) -> PathBuf {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap_or_else(|err| panic!("Failed to create directory \"{}\": {err}", parent.display()));
    }
    fs::write(path, content).unwrap_or_else(|err| panic!("Failed to write file \"{}\": {err}", path.display()));
    path.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_are_created_in_nested_directories() {
        let workspace = test_workspace!().with_files(&["textures/wall.png", "a.obj"]);
        assert!(workspace.root().join("textures/wall.png").is_file());
        assert_eq!(fs::read_to_string(workspace.root().join("a.obj")).unwrap(), "a.obj");
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let workspace = test_workspace!();
        let root = workspace.root().to_owned();
        assert!(root.exists());
        drop(workspace);
        assert!(!root.exists());
    }
}
