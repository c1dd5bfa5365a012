use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Broker refused the connection: {0}")]
    ConnectionRefused(String),
    #[error("Connection to broker failed: {0}")]
    ConnectionFailed(String),
    #[error("Not connected to a broker")]
    NotConnected,
    #[error("Failed to subscribe to {pattern}: {reason}")]
    Subscribe { pattern: String, reason: String },
    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },
    #[error("TLS configuration error: {0}")]
    Tls(String),
}
