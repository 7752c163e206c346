//! # Overview
//!
//! Crate for [packing](Workspace::pack) the source assets of a workspace into the formats the
//! engine loads at runtime.
//!
//! A workspace is a directory tree containing source assets like fonts, meshes and textures
//! together with a [`WorkspaceConfig`]. The configuration maps file extensions to encoder
//! modules. Encoder modules are native shared libraries that export a `Convert` and an `Update`
//! function (see [`encoder`]). Packing mirrors the workspace tree into the output directory:
//!
//! **Workspace:**
//!
//! ```text
//! project/
//! ├─ workspace.yaml
//! ├─ fonts/
//! │  ├─ title.ttf
//! ├─ textures/
//! │  ├─ wall.png
//! │  ├─ notes.txt
//! ```
//!
//! **Output directory** (`../Assets` by default):
//!
//! ```text
//! Assets/
//! ├─ fonts/
//! │  ├─ title.ttf      converted by the font encoder
//! ├─ textures/
//! │  ├─ wall.png       converted by the texture encoder
//! ```
//!
//! `notes.txt` is skipped because no encoder is configured for its extension.
//!
//! # Components
//!
//! - [`WorkspaceConfig`] persists the settings of a workspace and falls back to defaults.
//! - [`EncoderRegistry`] loads every encoder module once and owns it until it is cleared.
//! - [`Workspace`] scans the workspace and drives [`Workspace::pack`] and [`Workspace::update`].

mod common;
pub mod encoder;
mod encoder_registry;
mod workspace;
mod workspace_config;

#[cfg(test)]
mod test_utils;

pub use common::{normalize_extension, AssetKey, Error, Result};
pub use encoder::{Encoder, EncoderLoader, NativeEncoder, NativeLoader, PluginLoadError, PluginLoadErrorKind};
pub use encoder_registry::*;
pub use workspace::*;
pub use workspace_config::*;
