//! # conduit-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ConduitSettings::default()`]
//! 2. **User file**: `~/.conduit/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CONDUIT_*` overrides (highest priority)
//!
//! The loaded value is constructed once in `main` and handed to each service.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, parse_in_range, settings_path};
pub use types::*;
