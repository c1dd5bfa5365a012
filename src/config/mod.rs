mod settings;

pub use settings::{BrokerConfig, Config, ConfigError, TomlConfig, DEFAULT_PORT, EXAMPLE_CONFIG};
