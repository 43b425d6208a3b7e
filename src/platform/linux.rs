// Marksync platform paths for Linux
// Config: ~/.config/marksync
// Data:   ~/.local/share/marksync

use std::env;
use std::path::PathBuf;

/// Returns the configuration directory for Marksync on Linux.
/// Uses `$XDG_CONFIG_HOME/marksync` if set, otherwise `~/.config/marksync`.
pub fn get_config_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("marksync")
    } else {
        home_dir().join(".config").join("marksync")
    }
}

/// Returns the data directory for Marksync on Linux.
/// Uses `$XDG_DATA_HOME/marksync` if set, otherwise `~/.local/share/marksync`.
pub fn get_data_dir() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg).join("marksync")
    } else {
        home_dir().join(".local").join("share").join("marksync")
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| String::from("/tmp")))
}
