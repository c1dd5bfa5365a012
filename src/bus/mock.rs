//! Mock bus client for deterministic testing
//!
//! Implements [`BusClient`] without a broker. Tests inject deliveries with
//! [`MockBusClient::deliver`] and inspect everything the code under test
//! subscribed to or published. Publish times are taken from
//! `tokio::time::Instant`, so they follow a paused test clock.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use mqtt_logger::bus::mock::{MockBusClient, MockConfig};
//!
//! #[tokio::test]
//! async fn test_capture_flow() {
//!     let bus = Arc::new(
//!         MockBusClient::new().with_config(MockConfig::default().failing_topic("bad/topic")),
//!     );
//!
//!     // Hand `bus.clone()` to a Recorder or Replayer, then:
//!     bus.deliver("sensors/1", b"21.5".to_vec()).await;
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::bus::client::{BusClient, BusHandle, BusMessage, DELIVERY_BUFFER};
use crate::bus::error::BusError;

/// Configuration for mock bus behavior
#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    /// Refuse every connect with this reason
    pub refuse_connection: Option<String>,
    /// Topics for which publish fails
    pub failing_topics: Vec<String>,
    /// Patterns for which subscribe fails
    pub failing_subscriptions: Vec<String>,
    /// Simulated latency of each publish
    pub publish_delay: Duration,
}

impl MockConfig {
    /// Configure the broker to refuse connections
    pub fn refusing(mut self, reason: impl Into<String>) -> Self {
        self.refuse_connection = Some(reason.into());
        self
    }

    /// Make publishing to `topic` fail
    pub fn failing_topic(mut self, topic: impl Into<String>) -> Self {
        self.failing_topics.push(topic.into());
        self
    }

    /// Make subscribing to `pattern` fail
    pub fn failing_subscription(mut self, pattern: impl Into<String>) -> Self {
        self.failing_subscriptions.push(pattern.into());
        self
    }

    /// Configure how long each publish takes
    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = delay;
        self
    }
}

/// A message captured by the mock together with the time it was published
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub message: BusMessage,
    pub at: Instant,
}

/// Mock bus client for testing
pub struct MockBusClient {
    config: MockConfig,
    /// Delivery side of the channel handed out by connect
    sender: Mutex<Option<mpsc::Sender<BusMessage>>>,
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connect_count: Mutex<usize>,
    disconnect_called: Mutex<bool>,
}

impl MockBusClient {
    pub fn new() -> Self {
        Self {
            config: MockConfig::default(),
            sender: Mutex::new(None),
            published: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            connect_count: Mutex::new(0),
            disconnect_called: Mutex::new(false),
        }
    }

    /// Configure the mock with a MockConfig
    pub fn with_config(mut self, config: MockConfig) -> Self {
        self.config = config;
        self
    }

    /// Simulate the broker delivering a message.
    ///
    /// Returns false when the client is not connected or no subscription
    /// matches the topic.
    pub async fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.deliver_message(BusMessage::new(topic, payload)).await
    }

    /// Like [`MockBusClient::deliver`] with a caller-chosen receive time
    pub async fn deliver_message(&self, message: BusMessage) -> bool {
        let subscribed = self
            .subscriptions
            .lock()
            .iter()
            .any(|pattern| topic_matches(pattern, &message.topic));
        if !subscribed {
            return false;
        }

        let Some(sender) = self.sender.lock().clone() else {
            return false;
        };
        sender.send(message).await.is_ok()
    }

    /// Get all published messages in publish order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Get all subscribed patterns
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        *self.connect_count.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Check if disconnect was called
    pub fn was_disconnected(&self) -> bool {
        *self.disconnect_called.lock()
    }
}

impl Default for MockBusClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for MockBusClient {
    async fn connect(&self) -> Result<BusHandle, BusError> {
        *self.connect_count.lock() += 1;

        if let Some(reason) = &self.config.refuse_connection {
            return Err(BusError::ConnectionRefused(reason.clone()));
        }

        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        *self.sender.lock() = Some(tx);
        Ok(BusHandle::new(rx))
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        if self.config.failing_subscriptions.iter().any(|p| p == pattern) {
            return Err(BusError::Subscribe {
                pattern: pattern.to_string(),
                reason: "mock subscription failure".to_string(),
            });
        }

        self.subscriptions.lock().push(pattern.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }

        let at = Instant::now();
        if !self.config.publish_delay.is_zero() {
            tokio::time::sleep(self.config.publish_delay).await;
        }

        if self.config.failing_topics.iter().any(|t| t == topic) {
            return Err(BusError::Publish {
                topic: topic.to_string(),
                reason: "mock publish failure".to_string(),
            });
        }

        self.published.lock().push(PublishedMessage {
            message: BusMessage::new(topic, payload),
            at,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        *self.disconnect_called.lock() = true;
        // Dropping the sender closes the consumer's delivery channel
        self.sender.lock().take();
        Ok(())
    }
}

/// MQTT topic matching (`+` one level, `#` the remainder)
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
