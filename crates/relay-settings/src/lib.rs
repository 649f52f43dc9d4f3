//! # relay-settings
//!
//! Configuration for the relay hub, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `$RELAY_CONFIG` or `~/.relay/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `RELAY_*` overrides (highest priority)
//!
//! The merged result is validated before it is returned, so callers never see
//! a ping period that outlives the pong deadline or a zero-capacity queue.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
