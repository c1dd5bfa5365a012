use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::error::BusError;
use crate::data::unix_time_now;

/// Capacity of the delivery channel between a transport and its consumer
pub const DELIVERY_BUFFER: usize = 1024;

/// A message delivered by, or published to, the bus
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Wall-clock seconds since the Unix epoch when the transport received it
    pub unix_time: f64,
}

impl BusMessage {
    /// Message stamped with the current wall-clock time
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::at(topic, payload, unix_time_now())
    }

    pub fn at(topic: impl Into<String>, payload: impl Into<Vec<u8>>, unix_time: f64) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            unix_time,
        }
    }
}

/// Handle returned by a successful connect
pub struct BusHandle {
    /// Messages delivered for the client's subscriptions.
    ///
    /// Closed once the client disconnects.
    pub messages: mpsc::Receiver<BusMessage>,
}

impl BusHandle {
    pub fn new(messages: mpsc::Receiver<BusMessage>) -> Self {
        Self { messages }
    }
}

/// Publish/subscribe transport used by the recorder and the replayer
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Connect and wait for the broker to acknowledge the session.
    ///
    /// A refused connection is reported as [`BusError::ConnectionRefused`].
    async fn connect(&self) -> Result<BusHandle, BusError>;

    /// Subscribe to a topic pattern. Only valid after [`BusClient::connect`].
    async fn subscribe(&self, pattern: &str) -> Result<(), BusError>;

    /// Publish a payload (at most once)
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Disconnect and close the delivery channel
    async fn disconnect(&self) -> Result<(), BusError>;
}
