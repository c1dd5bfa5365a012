//! Publish/subscribe transport boundary
//!
//! The recorder and replayer only see [`BusClient`]. [`MqttBusClient`] talks
//! to a real broker; [`mock::MockBusClient`] is used by tests.

pub mod client;
pub mod error;
pub mod mock;
pub mod mqtt;

pub use client::{BusClient, BusHandle, BusMessage};
pub use error::BusError;
pub use mqtt::MqttBusClient;
