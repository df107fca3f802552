//! # sesh-settings
//!
//! Layered configuration for the session engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SeshSettings::default()`]
//! 2. **User file**: `~/.sesh/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SESH_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, expand_home, load_settings, load_settings_from_path, settings_path};
pub use types::*;
