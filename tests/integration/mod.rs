//! Integration tests for mqtt-logger
//!
//! These tests verify that the event store, the recorder and the replayer
//! work together, and that the binary behaves on the command line.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod record_replay;
