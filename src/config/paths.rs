//! Platform-specific data directory paths.
//!
//!   Windows: %APPDATA%/duplex-voice/data
//!   macOS:   ~/Library/Application Support/duplex-voice/data
//!   Linux:   $XDG_CONFIG_HOME/duplex-voice/data (default ~/.config)
//!
//! `DUPLEX_VOICE_DATA_DIR` overrides the platform default.

use std::path::PathBuf;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "DUPLEX_VOICE_DATA_DIR";

/// Get the engine data directory (cross-platform).
pub fn get_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    get_config_base().join("duplex-voice").join("data")
}

/// Directory for rolling log files.
pub fn get_log_dir() -> PathBuf {
    get_data_dir().join("logs")
}

/// Get the platform-appropriate base config directory.
fn get_config_base() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata);
        }
        dirs::config_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("AppData")
                .join("Roaming")
        })
    }

    #[cfg(target_os = "macos")]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("Application Support")
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    }
}
