pub mod bus;
pub mod capture;
pub mod cli;
pub mod config;
pub mod data;
pub mod util;

pub use bus::{BusClient, BusError, BusMessage, MqttBusClient};
pub use capture::{
    PlaybackReport, Recorder, RecorderConfig, RecorderError, ReplayError, Replayer,
    ReplayerConfig,
};
pub use cli::Cli;
pub use config::Config;
pub use data::{Database, DatabaseError, LogEntry, LogStore, Run, RunId, RunStore};
pub use util::{to_like_pattern, to_like_patterns};
