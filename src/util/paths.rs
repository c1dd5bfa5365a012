//! Default locations for the config file and the capture database

use std::path::PathBuf;

/// Database file used when nothing else is configured (relative to the working directory)
pub const DEFAULT_DATABASE_FILE: &str = "MQTT_log.db";

/// Get the config directory (~/.config/mqtt-logger on Linux)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("mqtt-logger"))
        .unwrap_or_else(|| PathBuf::from(".mqtt-logger"))
}

/// Get the default config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the default database path
pub fn database_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_toml_in_config_dir() {
        let path = config_path();
        assert_eq!(path.file_name().unwrap(), "config.toml");
        assert!(path.starts_with(config_dir()));
    }
}
