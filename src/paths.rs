//! Resolves the per-user path where the calibration profile is persisted.

use crate::consts::{CALIBRATION_FILE, CONFIG_APP_DIR, CONFIG_SUB_DIR};
use eyre::{eyre, Result};
use std::path::PathBuf;

/// Returns the full path to `calibration.json`. Parent directories are
/// created lazily by [`crate::calibration::CalibrationProfile::store`], not
/// here.
///
/// On POSIX this resolves to `$XDG_CONFIG_HOME` or `~/.config`; on macOS to
/// `~/Library/Application Support`; on Windows to `%APPDATA%` — matching the
/// original implementation's `user_config_dir()`.
pub fn calibration_file_path() -> Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| eyre!("could not resolve config directory"))?;
    Ok(base.join(CONFIG_APP_DIR).join(CONFIG_SUB_DIR).join(CALIBRATION_FILE))
}
