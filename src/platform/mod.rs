// Marksync platform abstraction
// Provides platform-specific config and data paths for Windows, macOS, and Linux.
//
// Uses `cfg(target_os)` for conditional compilation to select the correct
// platform-specific implementation at compile time.

use std::path::PathBuf;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
mod windows;

/// Environment variable overriding the data directory (local database location).
pub const DATA_DIR_ENV: &str = "MARKSYNC_DATA_DIR";

/// Returns the platform-specific configuration directory for Marksync.
///
/// - **Linux**: `~/.config/marksync` (or `$XDG_CONFIG_HOME/marksync`)
/// - **macOS**: `~/Library/Application Support/Marksync`
/// - **Windows**: `%APPDATA%/Marksync`
pub fn get_config_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        linux::get_config_dir()
    }
    #[cfg(target_os = "macos")]
    {
        macos::get_config_dir()
    }
    #[cfg(target_os = "windows")]
    {
        windows::get_config_dir()
    }
}

/// Returns the data directory for Marksync, honouring `MARKSYNC_DATA_DIR`.
///
/// - **Linux**: `~/.local/share/marksync` (or `$XDG_DATA_HOME/marksync`)
/// - **macOS**: `~/Library/Application Support/Marksync`
/// - **Windows**: `%APPDATA%/Marksync`
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    #[cfg(target_os = "linux")]
    {
        linux::get_data_dir()
    }
    #[cfg(target_os = "macos")]
    {
        macos::get_data_dir()
    }
    #[cfg(target_os = "windows")]
    {
        windows::get_data_dir()
    }
}

/// Default location of the local backend's SQLite file.
pub fn default_database_path() -> PathBuf {
    get_data_dir().join("marksync.db")
}
