//! Shared test utilities for mqtt-logger
//!
//! - Temporary event stores seeded with runs and messages

pub mod fixtures;
