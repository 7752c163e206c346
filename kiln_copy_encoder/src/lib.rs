//! Reference encoder module that copies the source file to the destination.
//!
//! Useful for pipelines that ship some files unchanged and for checking that an installation
//! is able to load encoder modules at all.

use std::{fs, io, os::raw::c_char, panic, path::Path};

use kiln_shared::c_str_to_path;

/// Copies the file at `source` to `destination` and creates the missing parent directories.
///
/// # Safety
///
/// Both pointers must be null or point to null-terminated strings.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn Convert(source: *const c_char, destination: *const c_char) -> bool {
    let (Some(source), Some(destination)) = (c_str_to_path(source), c_str_to_path(destination)) else {
        return false;
    };
    panic::catch_unwind(|| copy(&source, &destination).is_ok()).unwrap_or(false)
}

/// Copied files carry no metadata, so an update only checks that the source is still readable.
///
/// # Safety
///
/// The pointer must be null or point to a null-terminated string.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn Update(path: *const c_char) -> bool {
    let Some(path) = c_str_to_path(path) else {
        return false;
    };
    panic::catch_unwind(|| fs::metadata(&path).map(|metadata| metadata.is_file()).unwrap_or(false)).unwrap_or(false)
}

fn copy(source: &Path, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, destination)?;
    Ok(())
}
