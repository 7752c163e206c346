use std::{
    ffi::{CStr, CString},
    os::raw::c_char,
    path::{Path, PathBuf},
};

pub use chrono;
pub use log;
pub use num_cpus;
pub use parking_lot;
pub use pathdiff;
pub use rayon;
pub use thiserror;
pub use walkdir;

/// Name of the function this macro is called in
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        &name[..name.len() - 3]
    }};
}

/// Creates a null-terminated string from the given path so that it can be passed across a C ABI.
///
/// Returns `None` when the path is not valid UTF-8 or contains an interior 0 byte.
///
/// # Example
///
/// ```rust
/// use kiln_shared::path_to_c_string;
/// let c_string = path_to_c_string("textures/wall.png").unwrap();
/// assert_eq!(c_string.as_bytes(), b"textures/wall.png");
/// ```
pub fn path_to_c_string(path: impl AsRef<Path>) -> Option<CString> {
    let path = path.as_ref().to_str()?;
    CString::new(path).ok()
}

/// Creates a [`PathBuf`] from a null-terminated string that was received across a C ABI.
///
/// Returns `None` when the pointer is null or the string is not valid UTF-8.
///
/// # Safety
///
/// `ptr` must either be null or point to a null-terminated string that stays valid for the
/// duration of this call.
pub unsafe fn c_str_to_path(ptr: *const c_char) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_nul_is_rejected() {
        assert!(path_to_c_string("tex\0tures/wall.png").is_none());
    }

    #[test]
    fn c_string_round_trip() {
        let c_string = path_to_c_string("models/crate.obj").unwrap();
        let path = unsafe { c_str_to_path(c_string.as_ptr()) };
        assert_eq!(path, Some(PathBuf::from("models/crate.obj")));
    }

    #[test]
    fn null_pointer() {
        assert_eq!(unsafe { c_str_to_path(std::ptr::null()) }, None);
    }
}
