use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::adapters::mqtt::{BrokerEndpoint, InboundMessage, MessageBus, Qos, TransportError};
use crate::app::publisher::PublishLoop;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("failed to connect to broker: {0}")]
    Transport(#[source] TransportError),
    #[error("failed to subscribe to {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("connection is busy ({0:?})")]
    Busy(ConnectionState),
    #[error("connection attempt cancelled")]
    Cancelled,
    #[error("broker connection state lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum PubError {
    #[error("cannot publish while {0:?}")]
    NotConnected(ConnectionState),
    #[error("publish failed: {0}")]
    Transport(#[source] TransportError),
    #[error("broker connection state lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl ReconnectPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(interval) => interval,
            Self::Exponential { base, max } => base.saturating_mul(1_u32 << attempt.min(16)).min(max),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub endpoint: BrokerEndpoint,
    pub topic: String,
    pub qos: Qos,
    pub reconnect: ReconnectPolicy,
    pub poll_interval: Duration,
    pub ingest_queue_capacity: usize,
    pub ingest_workers: usize,
}

pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: &InboundMessage);
}

pub trait TelemetryPublisher {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PubError>;
}

#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = true;
        }
        self.changed.notify_all();
    }

    pub fn reset(&self) {
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = false;
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.stopped.lock().map(|stopped| *stopped).unwrap_or(true)
    }

    // true when stop was requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Ok(guard) = self.stopped.lock() else {
            return true;
        };

        match self
            .changed
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
        {
            Ok((stopped, _)) => *stopped,
            Err(_) => true,
        }
    }
}

#[derive(Default)]
pub struct Roles {
    pub ingestion: Option<Arc<dyn MessageHandler>>,
    pub publish_loop: Option<PublishLoop>,
}

#[derive(Default)]
struct Workers {
    delivery: Option<JoinHandle<()>>,
    ingest: Vec<JoinHandle<()>>,
    publisher: Option<JoinHandle<PublishLoop>>,
}

struct Inner<B> {
    bus: B,
    settings: BrokerSettings,
    state: Mutex<ConnectionState>,
    stop: StopSignal,
    ingestion: Option<Arc<dyn MessageHandler>>,
    publish_loop: Mutex<Option<PublishLoop>>,
    workers: Mutex<Workers>,
}

pub struct BrokerConnection<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for BrokerConnection<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: MessageBus + 'static> BrokerConnection<B> {
    pub fn new(bus: B, settings: BrokerSettings, roles: Roles) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                settings,
                state: Mutex::new(ConnectionState::Disconnected),
                stop: StopSignal::new(),
                ingestion: roles.ingestion,
                publish_loop: Mutex::new(roles.publish_loop),
                workers: Mutex::new(Workers::default()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner
            .state
            .lock()
            .map(|state| *state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.inner.settings
    }

    pub fn connect(&self) -> Result<(), ConnError> {
        self.connect_once(true)
    }

    pub fn connect_with_retry(&self) -> Result<(), ConnError> {
        self.inner.stop.reset();
        let mut attempt = 0_u32;

        loop {
            match self.connect_once(false) {
                Ok(()) => return Ok(()),
                Err(error @ (ConnError::Cancelled | ConnError::LockPoisoned)) => return Err(error),
                Err(error) => {
                    let delay = self.inner.settings.reconnect.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %error,
                        "broker connect failed"
                    );

                    if self.inner.stop.wait_timeout(delay) {
                        return Err(ConnError::Cancelled);
                    }
                }
            }
        }
    }

    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PubError> {
        let state = self
            .inner
            .state
            .lock()
            .map_err(|_| PubError::LockPoisoned)?;

        if *state != ConnectionState::Connected {
            return Err(PubError::NotConnected(*state));
        }

        self.inner
            .bus
            .publish(topic, payload, self.inner.settings.qos)
            .map_err(PubError::Transport)
    }

    pub fn disconnect(&self) -> Result<(), ConnError> {
        let workers = {
            let mut state = self.inner.lock_state()?;
            self.inner.stop.trigger();

            if *state != ConnectionState::Disconnected {
                *state = ConnectionState::Disconnecting;
                if let Err(error) = self.inner.bus.disconnect() {
                    tracing::warn!(error = %error, "broker disconnect reported an error");
                }
                *state = ConnectionState::Disconnected;
                tracing::info!(topic = %self.inner.settings.topic, "disconnected from broker");
            }

            self.take_workers()?
        };

        self.join_workers(workers);
        Ok(())
    }

    fn connect_once(&self, reset_stop: bool) -> Result<(), ConnError> {
        {
            let mut state = self.inner.lock_state()?;
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Disconnecting => {
                    return Err(ConnError::Busy(*state));
                }
                ConnectionState::Disconnected => {}
            }

            if reset_stop {
                self.inner.stop.reset();
            } else if self.inner.stop.is_triggered() {
                return Err(ConnError::Cancelled);
            }
            *state = ConnectionState::Connecting;
        }

        let established = self.inner.establish();

        {
            let mut state = self.inner.lock_state()?;
            if let Err(error) = established {
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Disconnected;
                }
                return Err(error);
            }

            if self.inner.stop.is_triggered() {
                let _ = self.inner.bus.disconnect();
                *state = ConnectionState::Disconnected;
                return Err(ConnError::Cancelled);
            }
            *state = ConnectionState::Connected;

            // Registered under the state lock so a concurrent disconnect joins them.
            self.start_workers()?;
        }

        tracing::info!(
            host = %self.inner.settings.endpoint.host,
            port = self.inner.settings.endpoint.port,
            topic = %self.inner.settings.topic,
            "connected to broker"
        );

        Ok(())
    }

    fn start_workers(&self) -> Result<(), ConnError> {
        let mut workers = self
            .inner
            .workers
            .lock()
            .map_err(|_| ConnError::LockPoisoned)?;

        let sender = self.inner.ingestion.as_ref().map(|handler| {
            let (sender, receiver) =
                mpsc::sync_channel(self.inner.settings.ingest_queue_capacity.max(1));
            let receiver = Arc::new(Mutex::new(receiver));

            for index in 0..self.inner.settings.ingest_workers.max(1) {
                workers.ingest.push(spawn_ingest_worker(
                    index,
                    Arc::clone(&receiver),
                    Arc::clone(handler),
                ));
            }

            sender
        });

        let inner = Arc::clone(&self.inner);
        workers.delivery = Some(thread::spawn(move || inner.run_delivery(sender)));

        let publish_loop = self
            .inner
            .publish_loop
            .lock()
            .map_err(|_| ConnError::LockPoisoned)?
            .take();
        if let Some(publish_loop) = publish_loop {
            let connection = self.clone();
            workers.publisher = Some(thread::spawn(move || {
                publish_loop.run(&connection, &connection.inner.stop)
            }));
        }

        Ok(())
    }

    fn take_workers(&self) -> Result<Workers, ConnError> {
        let mut workers = self
            .inner
            .workers
            .lock()
            .map_err(|_| ConnError::LockPoisoned)?;
        Ok(std::mem::take(&mut *workers))
    }

    fn join_workers(&self, workers: Workers) {
        if let Some(delivery) = workers.delivery
            && delivery.join().is_err()
        {
            tracing::error!("delivery thread panicked");
        }

        for worker in workers.ingest {
            if worker.join().is_err() {
                tracing::error!("ingestion worker panicked");
            }
        }

        if let Some(publisher) = workers.publisher {
            match publisher.join() {
                Ok(publish_loop) => {
                    if let Ok(mut slot) = self.inner.publish_loop.lock() {
                        *slot = Some(publish_loop);
                    }
                }
                Err(_) => tracing::error!("publish loop thread panicked"),
            }
        }
    }
}

impl<B: MessageBus + 'static> TelemetryPublisher for BrokerConnection<B> {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PubError> {
        BrokerConnection::publish(self, topic, payload)
    }
}

impl<B: MessageBus> Inner<B> {
    fn lock_state(&self) -> Result<MutexGuard<'_, ConnectionState>, ConnError> {
        self.state.lock().map_err(|_| ConnError::LockPoisoned)
    }

    fn establish(&self) -> Result<(), ConnError> {
        self.bus
            .connect(&self.settings.endpoint)
            .map_err(ConnError::Transport)?;

        if self.ingestion.is_some()
            && let Err(source) = self.bus.subscribe(&self.settings.topic, self.settings.qos)
        {
            let _ = self.bus.disconnect();
            return Err(ConnError::Subscribe {
                topic: self.settings.topic.clone(),
                source,
            });
        }

        Ok(())
    }

    fn run_delivery(&self, sender: Option<SyncSender<InboundMessage>>) {
        loop {
            if self.stop.is_triggered() {
                break;
            }

            match self.bus.poll(self.settings.poll_interval) {
                Ok(Some(message)) => {
                    let Some(sender) = &sender else {
                        continue;
                    };
                    if sender.send(message).is_err() {
                        tracing::error!("ingestion queue closed; stopping delivery");
                        break;
                    }
                }
                Ok(None) => {}
                Err(error) => {
                    if self.stop.is_triggered() {
                        break;
                    }
                    tracing::warn!(error = %error, "broker connection dropped");
                    if !self.reconnect() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("delivery loop stopped");
    }

    fn reconnect(&self) -> bool {
        {
            let Ok(mut state) = self.state.lock() else {
                return false;
            };
            if *state != ConnectionState::Connected {
                return false;
            }
            *state = ConnectionState::Connecting;
        }

        let mut attempt = 0_u32;
        loop {
            let delay = self.settings.reconnect.delay_for_attempt(attempt);
            if self.stop.wait_timeout(delay) {
                return false;
            }

            match self.establish() {
                Ok(()) => {
                    let Ok(mut state) = self.state.lock() else {
                        return false;
                    };
                    if self.stop.is_triggered() || *state != ConnectionState::Connecting {
                        let _ = self.bus.disconnect();
                        return false;
                    }
                    *state = ConnectionState::Connected;
                    tracing::info!(attempt, topic = %self.settings.topic, "reconnected to broker");
                    return true;
                }
                Err(error) => {
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(attempt, error = %error, "reconnect attempt failed");
                }
            }
        }
    }
}

fn spawn_ingest_worker(
    index: usize,
    receiver: Arc<Mutex<Receiver<InboundMessage>>>,
    handler: Arc<dyn MessageHandler>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            let message = {
                let Ok(receiver) = receiver.lock() else {
                    tracing::error!(worker = index, "ingestion queue lock poisoned");
                    break;
                };
                receiver.recv()
            };

            match message {
                Ok(message) => handler.on_message(&message),
                Err(_) => break,
            }
        }

        tracing::debug!(worker = index, "ingestion worker stopped");
    })
}
