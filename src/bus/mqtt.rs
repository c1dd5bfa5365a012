//! MQTT implementation of [`BusClient`] on top of `rumqttc`.
//!
//! The rumqttc event loop runs on its own tokio task. Incoming publishes are
//! forwarded into the delivery channel handed out by `connect`. Sessions are
//! clean, so the task subscribes again after every automatic reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::rustls;

use crate::bus::client::{BusClient, BusHandle, BusMessage, DELIVERY_BUFFER};
use crate::bus::error::BusError;
use crate::config::BrokerConfig;

/// Capacity of rumqttc's request queue
const REQUEST_CAPACITY: usize = 64;

/// Delay before polling again after an event loop error (rumqttc reconnects on the next poll)
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long disconnect waits for the event loop to flush the DISCONNECT packet
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

struct Connection {
    client: AsyncClient,
    event_loop: JoinHandle<()>,
}

/// Bus client talking to an MQTT broker
pub struct MqttBusClient {
    options: MqttOptions,
    connection: Mutex<Option<Connection>>,
    /// Patterns subscribed on the current connection, restored after a reconnect
    subscriptions: Arc<Mutex<Vec<String>>>,
}

impl MqttBusClient {
    /// Build a client from broker settings. Does not connect yet.
    pub fn new(config: &BrokerConfig) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("mqtt-logger-{}", uuid::Uuid::new_v4().simple()));

        let mut options = MqttOptions::new(client_id, config.address.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        if let Some((username, password)) = config.credentials() {
            options.set_credentials(username, password);
        }

        if config.use_tls || config.tls_insecure {
            let tls = if config.tls_insecure {
                tracing::warn!(
                    broker = %config.address,
                    "TLS certificate verification is disabled"
                );
                insecure_tls_config()
            } else {
                TlsConfiguration::default()
            };
            options.set_transport(Transport::tls_with_config(tls));
        }

        Self {
            options,
            connection: Mutex::new(None),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn client(&self) -> Result<AsyncClient, BusError> {
        self.connection
            .lock()
            .as_ref()
            .map(|conn| conn.client.clone())
            .ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl BusClient for MqttBusClient {
    async fn connect(&self) -> Result<BusHandle, BusError> {
        let (client, mut event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);

        wait_for_connack(&mut event_loop).await?;
        tracing::info!(
            broker = %self.options.broker_address().0,
            port = self.options.broker_address().1,
            "Connection successful"
        );

        self.subscriptions.lock().clear();
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        let event_loop = tokio::spawn(drive_event_loop(
            event_loop,
            client.clone(),
            self.subscriptions.clone(),
            tx,
        ));

        let previous = self
            .connection
            .lock()
            .replace(Connection { client, event_loop });
        if let Some(previous) = previous {
            previous.event_loop.abort();
        }

        Ok(BusHandle::new(rx))
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError> {
        self.client()?
            .subscribe(pattern, QoS::AtMostOnce)
            .await
            .map_err(|err| BusError::Subscribe {
                pattern: pattern.to_string(),
                reason: err.to_string(),
            })?;

        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.iter().any(|known| known == pattern) {
            subscriptions.push(pattern.to_string());
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        self.client()?
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|err| BusError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let Some(Connection {
            client,
            mut event_loop,
        }) = self.connection.lock().take()
        else {
            return Ok(());
        };

        if let Err(err) = client.disconnect().await {
            tracing::debug!(error = %err, "Disconnect request failed");
        }

        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut event_loop)
            .await
            .is_err()
        {
            event_loop.abort();
        }
        tracing::info!("MQTT broker disconnected");
        Ok(())
    }
}

/// Poll until the broker answers the CONNECT packet
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), BusError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(BusError::ConnectionRefused(format!("{:?}", ack.code)));
            }
            Ok(_) => {}
            Err(rumqttc::ConnectionError::ConnectionRefused(code)) => {
                return Err(BusError::ConnectionRefused(format!("{code:?}")));
            }
            Err(err) => return Err(BusError::ConnectionFailed(err.to_string())),
        }
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    subscriptions: Arc<Mutex<Vec<String>>>,
    tx: mpsc::Sender<BusMessage>,
) {
    loop {
        match event_loop.poll().await {
            // The first CONNACK was consumed by `wait_for_connack`
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let patterns = subscriptions.lock().clone();
                resubscribe(&client, &patterns);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BusMessage::new(publish.topic, publish.payload.to_vec());
                if tx.send(message).await.is_err() {
                    tracing::trace!("No consumer for delivered message");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "MQTT event loop error, reconnecting");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Queue a SUBSCRIBE for every pattern without waiting on the request channel.
///
/// Called from the event loop task itself, which is the only consumer of that
/// channel, so a blocking send could never complete once it is full.
/// Returns how many were queued.
fn resubscribe(client: &AsyncClient, patterns: &[String]) -> usize {
    let mut queued = 0;
    for pattern in patterns {
        match client.try_subscribe(pattern.as_str(), QoS::AtMostOnce) {
            Ok(()) => queued += 1,
            Err(err) => tracing::warn!(
                topic = %pattern,
                error = %err,
                "Failed to restore subscription after reconnect"
            ),
        }
    }
    if !patterns.is_empty() {
        tracing::info!(
            restored = queued,
            total = patterns.len(),
            "Reconnected, subscriptions restored"
        );
    }
    queued
}

/// TLS configuration that accepts any server certificate
fn insecure_tls_config() -> TlsConfiguration {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification))
        .with_no_client_auth();
    TlsConfiguration::Rustls(Arc::new(config))
}

mod danger {
    use tokio_rustls::rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use tokio_rustls::rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoCertificateVerification;

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_operations_require_connection() {
        let client = MqttBusClient::new(&BrokerConfig::default());

        assert_eq!(client.publish("a/b", b"x").await, Err(BusError::NotConnected));
        assert_eq!(client.subscribe("#").await, Err(BusError::NotConnected));
        // Disconnecting without a connection is a no-op
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_resubscribe_queues_every_pattern() {
        let options = MqttOptions::new("resubscribe", "localhost", 1883);
        let (client, _event_loop) = AsyncClient::new(options, 10);
        let patterns = vec!["sensors/#".to_string(), "home/+/temp".to_string()];

        assert_eq!(resubscribe(&client, &patterns), 2);
        assert_eq!(resubscribe(&client, &[]), 0);
    }

    #[tokio::test]
    async fn test_resubscribe_does_not_wait_on_full_queue() {
        let options = MqttOptions::new("resubscribe", "localhost", 1883);
        // Nobody polls, so the second request finds the queue full
        let (client, _event_loop) = AsyncClient::new(options, 1);
        let patterns = vec!["a/#".to_string(), "b/#".to_string()];

        assert_eq!(resubscribe(&client, &patterns), 1);
    }

    #[tokio::test]
    async fn test_resubscribe_after_event_loop_is_gone() {
        let options = MqttOptions::new("resubscribe", "localhost", 1883);
        let (client, event_loop) = AsyncClient::new(options, 10);
        drop(event_loop);

        assert_eq!(resubscribe(&client, &["a/#".to_string()]), 0);
    }

    #[tokio::test]
    async fn test_failed_subscribe_is_not_remembered() {
        let client = MqttBusClient::new(&BrokerConfig::default());
        assert!(client.subscriptions.lock().is_empty());
        // Nothing recorded when the subscribe itself fails
        assert!(client.subscribe("a/#").await.is_err());
        assert!(client.subscriptions.lock().is_empty());
    }

    #[test]
    fn test_client_id_defaults_to_random() {
        let a = MqttBusClient::new(&BrokerConfig::default());
        let b = MqttBusClient::new(&BrokerConfig::default());
        assert!(a.options.client_id().starts_with("mqtt-logger-"));
        assert_ne!(a.options.client_id(), b.options.client_id());
    }

    #[test]
    fn test_configured_client_id() {
        let config = BrokerConfig {
            client_id: Some("capture-1".to_string()),
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            ..BrokerConfig::default()
        };
        let client = MqttBusClient::new(&config);
        assert_eq!(client.options.client_id(), "capture-1");
    }
}
