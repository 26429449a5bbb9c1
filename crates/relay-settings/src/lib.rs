//! # relay-settings
//!
//! Layered configuration for the interview signaling relay.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.interview-relay/settings.json` or an explicit
//!    path, deep-merged over defaults
//! 3. **Environment variables**: `RELAY_*`, plus `PORT` and `DATABASE_URL`
//!    for compatibility with hosted deployments

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{DatabaseSettings, LoggingSettings, RelaySettings, ServerSettings};
