use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::{RecorderConfig, ReplayerConfig};
use crate::data::RunId;
use crate::util::paths::{config_path, database_path};

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Default MQTT port
pub const DEFAULT_PORT: u16 = 1883;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite file that runs and messages are stored in
    pub sqlite_database_path: PathBuf,
    /// Topic patterns to subscribe to when recording, or to filter by when playing back
    pub topics: Vec<String>,
    /// Broker connection settings
    pub broker: BrokerConfig,
    /// Log at INFO instead of WARN
    pub verbose: bool,
    /// Playback speed multiplier
    pub speed: f64,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub address: String,
    pub port: u16,
    pub use_tls: bool,
    /// Skip server certificate verification (implies TLS)
    pub tls_insecure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Random `mqtt-logger-<uuid>` when not set
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: DEFAULT_PORT,
            use_tls: false,
            tls_insecure: false,
            username: None,
            password: None,
            client_id: None,
            keep_alive_secs: 60,
        }
    }
}

impl BrokerConfig {
    /// Username and password, only when both are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sqlite_database_path: database_path(),
            topics: vec!["#".to_string()],
            broker: BrokerConfig::default(),
            verbose: false,
            speed: 1.0,
        }
    }
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub sqlite_database_path: Option<PathBuf>,
    pub topics: Option<Vec<String>>,
    pub broker: Option<BrokerConfig>,
    pub verbose: Option<bool>,
    pub speed: Option<f64>,
}

impl Config {
    /// Load the user config file if present, otherwise defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_file = config_path();
        if !config_file.exists() {
            return Ok(Config::default());
        }
        Self::load_from(&config_file)
    }

    /// Load a specific config file on top of the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse TOML config contents on top of the defaults
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        let toml_config = toml::from_str::<TomlConfig>(contents)?;
        let mut config = Config::default();

        if let Some(path) = toml_config.sqlite_database_path {
            config.sqlite_database_path = path;
        }
        if let Some(topics) = toml_config.topics {
            config.topics = topics;
        }
        if let Some(broker) = toml_config.broker {
            config.broker = broker;
        }
        if let Some(verbose) = toml_config.verbose {
            config.verbose = verbose;
        }
        if let Some(speed) = toml_config.speed {
            config.speed = speed;
        }

        Ok(config)
    }

    /// Recorder settings derived from this config
    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            database_path: self.sqlite_database_path.clone(),
            topics: self.topics.clone(),
        }
    }

    /// Replayer settings derived from this config, optionally limited to one run
    pub fn replayer_config(&self, run: Option<RunId>) -> ReplayerConfig {
        ReplayerConfig {
            database_path: self.sqlite_database_path.clone(),
            topics: Some(self.topics.clone()),
            run,
        }
    }
}
