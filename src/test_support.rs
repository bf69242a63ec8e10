use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::mqtt::{BrokerEndpoint, InboundMessage, MessageBus, Qos, TransportError};
use crate::app::broker::{
    BrokerSettings, ConnectionState, MessageHandler, PubError, ReconnectPolicy,
    TelemetryPublisher,
};
use crate::app::services::{StoreError, StorePort};
use crate::domain::clock::{Clock, TimestampMs};
use crate::domain::models::{LogRecord, NewLogRecord};

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn open_test_connection(test_name: &str) -> Connection {
    let template = ensure_template_db();
    let test_db_path = unique_test_db_path(test_name);

    if let Some(parent) = test_db_path.parent() {
        std::fs::create_dir_all(parent).expect("test db dir should be creatable");
    }

    std::fs::copy(&template, &test_db_path).expect("template db should be copied");
    open_connection(test_db_path.to_string_lossy().as_ref()).expect("test db should open")
}

fn ensure_template_db() -> PathBuf {
    static TEMPLATE_PATH: OnceLock<PathBuf> = OnceLock::new();

    TEMPLATE_PATH
        .get_or_init(|| {
            let template_path = std::env::var("TEST_DB_TEMPLATE_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| Path::new("./target/testdb/template.sqlite").to_path_buf());

            if let Some(parent) = template_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).expect("template parent dir should be creatable");
            }

            let mut connection = open_connection(template_path.to_string_lossy().as_ref())
                .expect("template db opens");
            run_migrations(&mut connection).expect("template migrations should succeed");

            template_path
        })
        .clone()
}

fn unique_test_db_path(test_name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    Path::new("./target/testdb")
        .join(format!("{test_name}-{now}-{counter}.sqlite"))
        .to_path_buf()
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn test_settings(topic: &str) -> BrokerSettings {
    BrokerSettings {
        endpoint: BrokerEndpoint {
            host: "127.0.0.1".to_string(),
            port: 1883,
            keepalive: Duration::from_secs(5),
            client_id: "test-client".to_string(),
        },
        topic: topic.to_string(),
        qos: Qos::AtLeastOnce,
        reconnect: ReconnectPolicy::Fixed(Duration::from_millis(50)),
        poll_interval: Duration::from_millis(20),
        ingest_queue_capacity: 16,
        ingest_workers: 2,
    }
}

pub struct StepClock {
    values: Vec<i64>,
    index: AtomicUsize,
}

impl StepClock {
    pub fn new(values: Vec<i64>) -> Self {
        Self {
            values,
            index: AtomicUsize::new(0),
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> TimestampMs {
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        let value = self
            .values
            .get(index)
            .or_else(|| self.values.last())
            .copied()
            .unwrap_or(0);
        TimestampMs(value)
    }
}

enum BusEvent {
    Message(InboundMessage),
    Drop,
}

// Publishes on a subscribed topic are echoed back through `poll`.
pub struct FakeBus {
    events_tx: Mutex<Sender<BusEvent>>,
    events_rx: Mutex<Receiver<BusEvent>>,
    connected: AtomicBool,
    connect_failures: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeBus {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            events_tx: Mutex::new(events_tx),
            events_rx: Mutex::new(events_rx),
            connected: AtomicBool::new(false),
            connect_failures: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        self.push(BusEvent::Message(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }));
    }

    pub fn drop_connection(&self) {
        self.push(BusEvent::Drop);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().expect("lock").clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().expect("lock").clone()
    }

    fn push(&self, event: BusEvent) {
        self.events_tx
            .lock()
            .expect("lock")
            .send(event)
            .expect("fake bus receiver should be alive");
    }
}

impl MessageBus for FakeBus {
    fn connect(&self, _endpoint: &BrokerEndpoint) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let failures = self.connect_failures.load(Ordering::SeqCst);
        if failures > 0 {
            if failures != usize::MAX {
                self.connect_failures.store(failures - 1, Ordering::SeqCst);
            }
            return Err(TransportError::Network("connection refused".to_string()));
        }

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: Qos) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.subscriptions
            .lock()
            .expect("lock")
            .push(topic.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8], _qos: Qos) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.published
            .lock()
            .expect("lock")
            .push((topic.to_string(), payload.to_vec()));

        if self.subscriptions().iter().any(|subscribed| subscribed == topic) {
            self.deliver(topic, payload);
        }
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Result<Option<InboundMessage>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }

        let event = self.events_rx.lock().expect("lock").recv_timeout(timeout);
        match event {
            Ok(BusEvent::Message(message)) => Ok(Some(message)),
            Ok(BusEvent::Drop) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::ConnectionLost("simulated drop".to_string()))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TransportError::ConnectionLost("event channel closed".to_string()))
            }
        }
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<InboundMessage>>,
}

impl RecordingHandler {
    pub fn count(&self) -> usize {
        self.messages.lock().expect("lock").len()
    }

    pub fn messages(&self) -> Vec<InboundMessage> {
        self.messages.lock().expect("lock").clone()
    }
}

impl MessageHandler for RecordingHandler {
    fn on_message(&self, message: &InboundMessage) {
        self.messages.lock().expect("lock").push(message.clone());
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    pub fn failing_first(count: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().expect("lock").clone()
    }
}

impl TelemetryPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PubError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(PubError::NotConnected(ConnectionState::Disconnected));
        }

        self.published
            .lock()
            .expect("lock")
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingStore {
    append_failures_remaining: AtomicUsize,
    fail_reads: AtomicBool,
    append_calls: AtomicUsize,
    appended: Mutex<Vec<NewLogRecord>>,
}

impl RecordingStore {
    pub fn failing_first(count: usize) -> Self {
        Self {
            append_failures_remaining: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn failing_reads() -> Self {
        Self {
            fail_reads: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn appended(&self) -> Vec<NewLogRecord> {
        self.appended.lock().expect("lock").clone()
    }
}

impl StorePort for RecordingStore {
    fn append(&self, record: &NewLogRecord) -> Result<String, StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.append_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.append_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::ConnectionLost);
        }

        let mut appended = self.appended.lock().expect("lock");
        appended.push(record.clone());
        Ok(format!("record-{}", appended.len()))
    }

    fn list_all(&self) -> Result<Vec<LogRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionLost);
        }

        Ok(self
            .appended()
            .into_iter()
            .enumerate()
            .map(|(index, record)| LogRecord {
                id: format!("record-{}", index + 1),
                received_at: record.received_at,
                topic: record.topic,
                payload: record.payload,
            })
            .collect())
    }
}
