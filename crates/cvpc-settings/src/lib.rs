//! # cvpc-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from these layers (in priority order, lowest first):
//! 1. **Compiled defaults**: [`CvpcSettings::default()`]
//! 2. **User file**: `~/.cvpc/settings.json`, any subset of keys
//! 3. **Environment variables**: `CVPC_*` overrides
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, drop_nulls, load_settings,
    load_settings_from_path, secs_to_millis, settings_path,
};
pub use types::{CvpcSettings, LoggingSettings, WsSettings};
