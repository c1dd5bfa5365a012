//! Event store for captured MQTT traffic
//!
//! This module provides SQLite-based storage for recording runs and the
//! messages captured during them.

mod database;
mod log;
mod models;
mod run;
pub mod schema;

pub use database::{Database, DatabaseError, SchemaStatus};
pub use log::LogStore;
pub use models::{unix_time_now, LogEntry, Run, RunId};
pub use run::RunStore;
