// Marksync platform paths for Windows
// Config: %APPDATA%/Marksync
// Data:   %APPDATA%/Marksync

use std::env;
use std::path::PathBuf;

/// Returns the configuration directory for Marksync on Windows.
/// `%APPDATA%/Marksync`
pub fn get_config_dir() -> PathBuf {
    let appdata =
        env::var("APPDATA").unwrap_or_else(|_| String::from("C:\\Users\\Default\\AppData\\Roaming"));
    PathBuf::from(appdata).join("Marksync")
}

/// Returns the data directory for Marksync on Windows.
/// `%APPDATA%/Marksync`
pub fn get_data_dir() -> PathBuf {
    get_config_dir()
}
