use crate::adapters::mqtt::InboundMessage;
use crate::app::broker::MessageHandler;
use crate::app::services::StorePort;
use crate::domain::clock::{Clock, TimestampMs, to_iso8601_seconds};
use crate::domain::models::NewLogRecord;
use crate::domain::telemetry::{decode_json, validate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(String),
    DecodeFailed,
    ValidationFailed,
    StoreFailed,
}

pub struct IngestionPipeline<S, Cl> {
    store: S,
    clock: Cl,
}

impl<S, Cl> IngestionPipeline<S, Cl>
where
    S: StorePort,
    Cl: Clock,
{
    pub fn new(store: S, clock: Cl) -> Self {
        Self { store, clock }
    }

    pub fn handle(&self, raw: &[u8], topic: &str, now: TimestampMs) -> IngestOutcome {
        let value = match decode_json(raw) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(
                    topic,
                    bytes = raw.len(),
                    error = %error,
                    "discarding undecodable message"
                );
                return IngestOutcome::DecodeFailed;
            }
        };

        let payload = match validate(&value) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(
                    topic,
                    field = error.field().unwrap_or("<payload>"),
                    error = %error,
                    "discarding message that failed validation"
                );
                return IngestOutcome::ValidationFailed;
            }
        };

        let record = NewLogRecord {
            received_at: to_iso8601_seconds(now),
            topic: topic.to_string(),
            payload,
        };

        match self.store.append(&record) {
            Ok(id) => {
                tracing::info!(
                    id = %id,
                    topic,
                    session_id = payload.session_id,
                    received_at = %record.received_at,
                    "telemetry persisted"
                );
                IngestOutcome::Stored(id)
            }
            Err(error) => {
                tracing::error!(
                    topic,
                    session_id = payload.session_id,
                    error = %error,
                    "failed to persist telemetry; message dropped"
                );
                IngestOutcome::StoreFailed
            }
        }
    }
}

impl<S, Cl> MessageHandler for IngestionPipeline<S, Cl>
where
    S: StorePort,
    Cl: Clock + Send + Sync,
{
    fn on_message(&self, message: &InboundMessage) {
        self.handle(&message.payload, &message.topic, self.clock.now());
    }
}
