use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event, MqttOptions, Packet, QoS,
    RecvTimeoutError,
};
use thiserror::Error;

const REQUEST_QUEUE_CAPACITY: usize = 64;

pub trait MessageBus: Send + Sync {
    fn connect(&self, endpoint: &BrokerEndpoint) -> Result<(), TransportError>;
    fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError>;
    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError>;
    // Err means the session dropped and needs a fresh connect.
    fn poll(&self, timeout: Duration) -> Result<Option<InboundMessage>, TransportError>;
    fn disconnect(&self) -> Result<(), TransportError>;
}

impl<B: MessageBus + ?Sized> MessageBus for std::sync::Arc<B> {
    fn connect(&self, endpoint: &BrokerEndpoint) -> Result<(), TransportError> {
        (**self).connect(endpoint)
    }

    fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        (**self).subscribe(topic, qos)
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError> {
        (**self).publish(topic, payload, qos)
    }

    fn poll(&self, timeout: Duration) -> Result<Option<InboundMessage>, TransportError> {
        (**self).poll(timeout)
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        (**self).disconnect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub keepalive: Duration,
    pub client_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }
}

impl From<Qos> for QoS {
    fn from(value: Qos) -> Self {
        match value {
            Qos::AtMostOnce => QoS::AtMostOnce,
            Qos::AtLeastOnce => QoS::AtLeastOnce,
            Qos::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("broker did not respond within {0:?}")]
    Timeout(Duration),
    #[error("not connected to broker")]
    NotConnected,
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),
    #[error("broker request rejected: {0}")]
    Request(String),
    #[error("broker operation cancelled")]
    Cancelled,
}

pub struct RumqttBus {
    client: Mutex<Option<Client>>,
    connection: Mutex<Option<Connection>>,
    closing: AtomicBool,
}

impl RumqttBus {
    pub fn new() -> Self {
        Self {
            client: Mutex::new(None),
            connection: Mutex::new(None),
            closing: AtomicBool::new(false),
        }
    }

    fn clear(&self) {
        if let Ok(mut client) = self.client.lock() {
            client.take();
        }
    }
}

impl Default for RumqttBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for RumqttBus {
    fn connect(&self, endpoint: &BrokerEndpoint) -> Result<(), TransportError> {
        self.closing.store(false, Ordering::SeqCst);

        let mut options = MqttOptions::new(&endpoint.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(endpoint.keepalive);
        // Persistent session so the broker redelivers unacknowledged QoS>0 messages.
        options.set_clean_session(false);

        let (client, mut connection) = Client::new(options, REQUEST_QUEUE_CAPACITY);
        *lock(&self.client)? = Some(client);

        let deadline = Instant::now() + endpoint.keepalive;
        loop {
            if self.closing.load(Ordering::SeqCst) {
                self.clear();
                return Err(TransportError::Cancelled);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.clear();
                return Err(TransportError::Timeout(endpoint.keepalive));
            }

            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        self.clear();
                        return Err(TransportError::Refused(format!("{:?}", ack.code)));
                    }
                    if self.closing.load(Ordering::SeqCst) {
                        self.clear();
                        return Err(TransportError::Cancelled);
                    }

                    *lock(&self.connection)? = Some(connection);
                    tracing::debug!(
                        host = %endpoint.host,
                        port = endpoint.port,
                        session_present = ack.session_present,
                        "mqtt handshake completed"
                    );
                    return Ok(());
                }
                Ok(Ok(_)) => {}
                Ok(Err(error)) => {
                    self.clear();
                    return Err(map_connection_error(error));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.clear();
                    return Err(TransportError::Network("mqtt event loop closed".to_string()));
                }
            }
        }
    }

    fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        let client = lock(&self.client)?;
        let client = client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .try_subscribe(topic, qos.into())
            .map_err(|error| TransportError::Request(error.to_string()))
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError> {
        let client = lock(&self.client)?;
        let client = client.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .try_publish(topic, qos.into(), false, payload.to_vec())
            .map_err(|error| TransportError::Request(error.to_string()))
    }

    fn poll(&self, timeout: Duration) -> Result<Option<InboundMessage>, TransportError> {
        let mut guard = lock(&self.connection)?;
        let connection = guard.as_mut().ok_or(TransportError::NotConnected)?;

        match connection.recv_timeout(timeout) {
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => Ok(Some(InboundMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            })),
            Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                guard.take();
                Err(TransportError::ConnectionLost(
                    "broker sent DISCONNECT".to_string(),
                ))
            }
            Ok(Ok(_)) | Err(RecvTimeoutError::Timeout) => Ok(None),
            Ok(Err(error)) => {
                guard.take();
                Err(TransportError::ConnectionLost(error.to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                guard.take();
                Err(TransportError::ConnectionLost(
                    "mqtt event loop closed".to_string(),
                ))
            }
        }
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);

        let client = lock(&self.client)?.take();
        let result = match client {
            Some(client) => client
                .try_disconnect()
                .map_err(|error| TransportError::Request(error.to_string())),
            None => Ok(()),
        };

        lock(&self.connection)?.take();
        result
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, TransportError> {
    mutex
        .lock()
        .map_err(|_| TransportError::Network("mqtt client lock poisoned".to_string()))
}

fn map_connection_error(error: ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(format!("{code:?}")),
        ConnectionError::NetworkTimeout => {
            TransportError::Network("network timeout while connecting".to_string())
        }
        other => TransportError::Network(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{BrokerEndpoint, MessageBus, Qos, RumqttBus, TransportError};

    #[test]
    fn parses_qos_levels() {
        assert_eq!(Qos::from_level(0), Some(Qos::AtMostOnce));
        assert_eq!(Qos::from_level(1), Some(Qos::AtLeastOnce));
        assert_eq!(Qos::from_level(2), Some(Qos::ExactlyOnce));
        assert_eq!(Qos::from_level(3), None);
    }

    #[test]
    fn requests_fail_before_connect() {
        let bus = RumqttBus::new();

        assert_eq!(
            bus.publish("charger/1", b"{}", Qos::AtLeastOnce),
            Err(TransportError::NotConnected)
        );
        assert_eq!(
            bus.subscribe("charger/1", Qos::AtLeastOnce),
            Err(TransportError::NotConnected)
        );
        assert_eq!(
            bus.poll(Duration::from_millis(10)),
            Err(TransportError::NotConnected)
        );
    }

    #[test]
    fn disconnect_without_session_is_noop() {
        let bus = RumqttBus::new();

        assert_eq!(bus.disconnect(), Ok(()));
        assert_eq!(bus.disconnect(), Ok(()));
    }

    #[test]
    fn connect_to_closed_port_reports_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let port = listener
            .local_addr()
            .expect("addr should be available")
            .port();
        drop(listener);

        let bus = RumqttBus::new();
        let result = bus.connect(&BrokerEndpoint {
            host: "127.0.0.1".to_string(),
            port,
            keepalive: Duration::from_secs(5),
            client_id: "connect-refused-test".to_string(),
        });

        assert!(matches!(
            result,
            Err(TransportError::Network(_) | TransportError::Timeout(_))
        ));
        assert_eq!(
            bus.publish("charger/1", b"{}", Qos::AtMostOnce),
            Err(TransportError::NotConnected)
        );
    }
}
