//! # quarry-settings
//!
//! Layered configuration for the quarry client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`QuarrySettings::default()`]
//! 2. **User file**: `~/.quarry/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `QUARRY_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! let settings = quarry_settings::load_settings().unwrap_or_default();
//! println!("backend: {}", settings.server.url);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = QuarrySettings::default();
        assert!(settings_path().ends_with(".quarry/settings.json"));
    }
}
